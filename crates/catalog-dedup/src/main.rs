//! catalog-dedup CLI - duplicate detection for product catalogs.

use catalog_dedup::blocking::{build_blocks, Block, BlockingConfig, Blocks};
use catalog_dedup::bootstrap::{best_across_blocks, BlockInput};
use catalog_dedup::evaluation::{evaluate_candidates, evaluate_clusters};
use catalog_dedup::features::{FeatureMatrix, FeatureMatrixBuilder};
use catalog_dedup::io::{read_catalog, write_block_members, write_json, CatalogRecord, MatrixStore};
use catalog_dedup::minhash::{num_hashes_for_tokens, MinHasher, DEFAULT_SEED};
use catalog_dedup::{
    BinaryMatrix, BootstrapConfig, BootstrapHarness, DedupConfig, Deduplicator, EvaluationRecord, GroundTruth,
    ParameterGrid, SignatureMatrix, TuningReport,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Block group used when blocking is disabled.
const ALL_BLOCK: &str = "all";

/// Duplicate detection for product catalogs.
///
/// Hashes catalog items with MinHash, pairs them with LSH and groups the
/// pairs with complete-linkage clustering.
#[derive(Parser, Debug)]
#[command(name = "catalog-dedup")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging unless RUST_LOG is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Show progress spinners.
    #[arg(long, global = true)]
    progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and store feature and signature matrices per block
    Signatures {
        /// Catalog file (JSONL).
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output directory.
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        #[command(flatten)]
        blocking: BlockingArgs,

        #[command(flatten)]
        hashing: HashingArgs,
    },

    /// Run the detection pipeline once and report duplicate groups
    Detect {
        /// Catalog file (JSONL).
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Rows per band.
        #[arg(short = 'r', long, default_value = "5")]
        rows_per_band: usize,

        /// Number of bands.
        #[arg(short = 'b', long, default_value = "20")]
        bands: usize,

        /// Maximum Jaccard distance inside a cluster (0.0-1.0).
        #[arg(short, long, default_value = "0.5")]
        threshold: f64,

        #[command(flatten)]
        hashing: HashingArgs,

        /// Write duplicate groups (item ids) to this JSON file.
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Tune rows per band, bands and threshold with bootstrap resampling
    Tune {
        /// Catalog file (JSONL).
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// JSON grid file with rows_per_band, num_bands and thresholds.
        #[arg(long, value_name = "FILE")]
        grid: Option<PathBuf>,

        /// Bootstrap repetitions per combination.
        #[arg(short = 'k', long, default_value = "10")]
        repetitions: usize,

        /// Evaluate combinations on one thread.
        #[arg(long)]
        sequential: bool,

        #[command(flatten)]
        blocking: BlockingArgs,

        #[command(flatten)]
        hashing: HashingArgs,

        /// Write every record to this JSON file.
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Debug)]
struct BlockingArgs {
    /// Treat the whole catalog as one block.
    #[arg(long)]
    no_blocking: bool,

    /// Blocks smaller than this are merged into overlapping blocks.
    #[arg(long, default_value = "3")]
    min_block_size: usize,
}

#[derive(clap::Args, Debug)]
struct HashingArgs {
    /// Number of MinHash functions (defaults depend on the command).
    #[arg(long)]
    num_hashes: Option<usize>,

    /// Seed for hash functions and resampling.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

/// JSON output for `signatures`.
#[derive(Serialize)]
struct SignaturesOutput {
    input: String,
    output: String,
    items: usize,
    tokens: usize,
    num_hashes: usize,
    primary_blocks: usize,
    secondary_blocks: usize,
    elapsed_secs: f64,
}

/// JSON output for `detect`.
#[derive(Serialize)]
struct DetectOutput {
    input: String,
    items: usize,
    tokens: usize,
    num_hashes: usize,
    rows_per_band: usize,
    bands: usize,
    threshold: f64,
    candidate_pairs: usize,
    fraction_of_comparisons: f64,
    duplicate_groups: Vec<Vec<String>>,
    clustering_aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation: Option<DetectEvaluation>,
    elapsed_secs: f64,
}

#[derive(Serialize)]
struct DetectEvaluation {
    ground_truth_pairs: usize,
    pair_quality: f64,
    pair_completeness: f64,
    f1_star: f64,
    precision: f64,
    recall: f64,
    f1: f64,
}

/// One tuning record with the block it came from.
#[derive(Serialize)]
struct BlockRecord<'a> {
    block: &'a str,
    #[serde(flatten)]
    record: &'a EvaluationRecord,
}

/// JSON output for `tune`.
#[derive(Serialize)]
struct TuneOutput<'a> {
    input: String,
    blocks: usize,
    ground_truth_pairs: usize,
    records: Vec<BlockRecord<'a>>,
    best: Option<BlockRecord<'a>>,
    skipped: BTreeMap<String, usize>,
    reconciled: usize,
    elapsed_secs: f64,
}

/// Create a spinner for indeterminate progress.
fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Spinner when `--progress` is set and output is not JSON.
fn maybe_spinner(cli: &Cli, msg: &str) -> Option<ProgressBar> {
    (cli.progress && !cli.json).then(|| create_spinner(msg))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn load_catalog(cli: &Cli, input: &Path) -> Result<(Vec<CatalogRecord>, FeatureMatrix), Box<dyn std::error::Error>> {
    let pb = maybe_spinner(cli, "Reading catalog...");
    let records = read_catalog(input)?;
    if records.is_empty() {
        fail("no records found in input file");
    }

    let tokens: Vec<Vec<String>> = records.iter().map(|r| r.tokens.clone()).collect();
    let features = FeatureMatrixBuilder::new().build(&tokens);

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    if cli.verbose && !cli.json {
        eprintln!(
            "Read {} items with {} distinct tokens",
            records.len(),
            features.vocabulary.len()
        );
    }
    Ok((records, features))
}

fn blocks_for(records: &[CatalogRecord], args: &BlockingArgs) -> Blocks {
    if args.no_blocking {
        Blocks {
            primary: vec![Block::new(ALL_BLOCK, (0..records.len()).collect())],
            secondary: Vec::new(),
        }
    } else {
        build_blocks(
            records,
            &BlockingConfig::default().with_min_block_size(args.min_block_size),
        )
    }
}

fn grouped_blocks(blocks: &Blocks) -> impl Iterator<Item = (&'static str, &Block)> {
    blocks
        .primary
        .iter()
        .map(|b| ("primary", b))
        .chain(blocks.secondary.iter().map(|b| ("secondary", b)))
}

fn hasher_for(features: &FeatureMatrix, hashing: &HashingArgs) -> Result<MinHasher, Box<dyn std::error::Error>> {
    let tokens = features.matrix.rows();
    let num_hashes = hashing.num_hashes.unwrap_or_else(|| num_hashes_for_tokens(tokens));
    Ok(MinHasher::with_seed(tokens, num_hashes, hashing.seed)?)
}

fn run_signatures(
    cli: &Cli,
    input: &Path,
    output: &Path,
    blocking: &BlockingArgs,
    hashing: &HashingArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let (records, features) = load_catalog(cli, input)?;
    let blocks = blocks_for(&records, blocking);
    let hasher = hasher_for(&features, hashing)?;
    let store = MatrixStore::open(output)?;

    let pb = maybe_spinner(cli, "Hashing blocks...");
    for (group, block) in grouped_blocks(&blocks) {
        let binary = block.submatrix(&features.matrix)?;
        let signatures = hasher.signature_matrix(&binary)?;
        store.save_binary(group, &block.key, &binary)?;
        store.save_signatures(group, &block.key, &signatures)?;
        if let Some(ref pb) = pb {
            pb.set_message(format!("Stored {group} block {}", block.key));
        }
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    write_block_members(output.join("primary_blocks.json"), &blocks.primary, &records)?;
    write_block_members(output.join("secondary_blocks.json"), &blocks.secondary, &records)?;

    let summary = SignaturesOutput {
        input: input.display().to_string(),
        output: output.display().to_string(),
        items: records.len(),
        tokens: features.matrix.rows(),
        num_hashes: hasher.num_hashes(),
        primary_blocks: blocks.primary.len(),
        secondary_blocks: blocks.secondary.len(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        eprintln!();
        eprintln!("Signature Results:");
        eprintln!("  Items:             {}", summary.items);
        eprintln!("  Tokens:            {}", summary.tokens);
        eprintln!("  Hash functions:    {}", summary.num_hashes);
        eprintln!("  Primary blocks:    {}", summary.primary_blocks);
        eprintln!("  Secondary blocks:  {}", summary.secondary_blocks);
        eprintln!("  Output directory:  {}", summary.output);
    }
    Ok(())
}

fn run_detect(
    cli: &Cli,
    input: &Path,
    rows_per_band: usize,
    bands: usize,
    threshold: f64,
    hashing: &HashingArgs,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let (records, features) = load_catalog(cli, input)?;

    let mut config = DedupConfig::default()
        .with_bands(rows_per_band, bands)
        .with_threshold(threshold)
        .with_seed(hashing.seed);
    if let Some(n) = hashing.num_hashes {
        config = config.with_num_hashes(n);
    }

    let pb = maybe_spinner(cli, "Detecting duplicates...");
    let result = Deduplicator::new(config).run(&features.matrix)?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let groups: Vec<Vec<String>> = result
        .clusters
        .duplicate_groups()
        .map(|members| members.iter().map(|&i| records[i].id.clone()).collect())
        .collect();

    let ids: Vec<&str> = records.iter().map(|r| r.model_id.as_str()).collect();
    let truth = GroundTruth::from_identifiers(&ids);
    let evaluation = (!truth.is_empty()).then(|| {
        let candidates = evaluate_candidates(&result.candidates.pairs, &truth, records.len());
        let clusters = evaluate_clusters(&result.clusters.predicted_pairs(), &truth);
        DetectEvaluation {
            ground_truth_pairs: truth.len(),
            pair_quality: candidates.pair_quality,
            pair_completeness: candidates.pair_completeness,
            f1_star: candidates.f1_star,
            precision: clusters.precision,
            recall: clusters.recall,
            f1: clusters.f1,
        }
    });

    let stats = &result.stats;
    let summary = DetectOutput {
        input: input.display().to_string(),
        items: stats.items,
        tokens: stats.tokens,
        num_hashes: stats.num_hashes,
        rows_per_band,
        bands,
        threshold,
        candidate_pairs: stats.candidate_pairs,
        fraction_of_comparisons: stats.fraction_of_comparisons,
        duplicate_groups: groups,
        clustering_aborted: stats.clustering_aborted,
        evaluation,
        elapsed_secs: start.elapsed().as_secs_f64(),
    };

    if let Some(path) = output {
        write_json(path, &summary.duplicate_groups)?;
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    eprintln!();
    eprintln!("Detection Results:");
    eprintln!("  Items:             {}", summary.items);
    eprintln!("  Candidate pairs:   {}", summary.candidate_pairs);
    eprintln!(
        "  Comparisons:       {:.4}% of all pairs",
        summary.fraction_of_comparisons * 100.0
    );
    eprintln!("  Duplicate groups:  {}", summary.duplicate_groups.len());
    if summary.clustering_aborted {
        eprintln!("  Clustering aborted: candidate pairs do not cover every pair of matched items");
    }
    if cli.verbose {
        for group in &summary.duplicate_groups {
            eprintln!("    {}", group.join(", "));
        }
    }
    if let Some(ref e) = summary.evaluation {
        eprintln!();
        eprintln!("Evaluation ({} known duplicate pairs):", e.ground_truth_pairs);
        eprintln!("  Pair quality:      {:.4}", e.pair_quality);
        eprintln!("  Pair completeness: {:.4}", e.pair_completeness);
        eprintln!("  F1*:               {:.4}", e.f1_star);
        eprintln!("  Cluster F1:        {:.4}", e.f1);
    }
    eprintln!();
    eprintln!("Total time: {:.3}s", summary.elapsed_secs);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_tune(
    cli: &Cli,
    input: &Path,
    grid_path: Option<&Path>,
    repetitions: usize,
    sequential: bool,
    blocking: &BlockingArgs,
    hashing: &HashingArgs,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let grid = match grid_path {
        Some(path) => ParameterGrid::from_json(&std::fs::read_to_string(path)?)?,
        None => ParameterGrid::original(),
    };
    if grid.is_empty() {
        fail("parameter grid has no combinations");
    }

    let (records, features) = load_catalog(cli, input)?;
    let ids: Vec<&str> = records.iter().map(|r| r.model_id.as_str()).collect();
    let truth = GroundTruth::from_identifiers(&ids);
    if truth.is_empty() && !cli.json {
        eprintln!("Warning: no items share a model_id; every repetition will be skipped");
    }

    let blocks = blocks_for(&records, blocking);
    let hasher = hasher_for(&features, hashing)?;

    let pb = maybe_spinner(cli, "Hashing blocks...");
    let mut prepared: Vec<(String, SignatureMatrix, BinaryMatrix, GroundTruth)> = Vec::new();
    for (group, block) in grouped_blocks(&blocks) {
        let binary = block.submatrix(&features.matrix)?;
        let signatures = hasher.signature_matrix(&binary)?;
        let block_truth = truth.for_block(&block.members);
        prepared.push((format!("{group}/{}", block.key), signatures, binary, block_truth));
    }

    if let Some(ref pb) = pb {
        pb.set_message(format!(
            "Tuning {} blocks over {} combinations...",
            prepared.len(),
            grid.len()
        ));
    }

    let inputs: Vec<BlockInput<'_>> = prepared
        .iter()
        .map(|(key, signatures, binary, block_truth)| BlockInput {
            key,
            signatures,
            features: Some(binary),
            truth: block_truth,
        })
        .collect();

    let config = BootstrapConfig::default()
        .with_repetitions(repetitions)
        .with_seed(hashing.seed)
        .with_parallel(!sequential);
    let reports = BootstrapHarness::new(grid, config).run_blocks(&inputs);

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let mut skipped: BTreeMap<String, usize> = BTreeMap::new();
    for report in reports.values() {
        for (reason, count) in &report.skipped {
            let name = serde_json::to_value(reason)?
                .as_str()
                .map_or_else(|| format!("{reason:?}"), str::to_string);
            *skipped.entry(name).or_default() += count;
        }
    }

    let all_records: Vec<BlockRecord<'_>> = reports
        .iter()
        .flat_map(|(block, report): (&String, &TuningReport)| {
            report.records.iter().map(move |record| BlockRecord {
                block: block.as_str(),
                record,
            })
        })
        .collect();
    let best = best_across_blocks(&reports).map(|(block, record)| BlockRecord { block, record });

    let summary = TuneOutput {
        input: input.display().to_string(),
        blocks: prepared.len(),
        ground_truth_pairs: truth.len(),
        records: all_records,
        best,
        skipped,
        reconciled: reports.values().map(|report| report.reconciled).sum(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    };

    if let Some(path) = output {
        write_json(path, &summary.records)?;
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    eprintln!();
    eprintln!("Tuning Results:");
    eprintln!("  Blocks:            {}", summary.blocks);
    eprintln!("  Known pairs:       {}", summary.ground_truth_pairs);
    eprintln!("  Records:           {}", summary.records.len());
    for (reason, count) in &summary.skipped {
        eprintln!("  Skipped ({reason}): {count}");
    }
    if summary.reconciled > 0 {
        eprintln!("  Rows adjusted:     {}", summary.reconciled);
    }
    if cli.verbose {
        eprintln!();
        for r in &summary.records {
            eprintln!(
                "  {} r={} b={} t={:.2} F1*={:.4} PQ={:.4} PC={:.4} FoC={:.4} F1={:.4}",
                r.block,
                r.record.r,
                r.record.b,
                r.record.threshold,
                r.record.avg_f1_star,
                r.record.avg_pair_quality,
                r.record.avg_pair_completeness,
                r.record.fraction_of_comparisons,
                r.record.avg_final_f1
            );
        }
    }
    eprintln!();
    match &summary.best {
        Some(best) => {
            eprintln!("Best configuration:");
            eprintln!("  Block:             {}", best.block);
            eprintln!("  Rows per band:     {}", best.record.r);
            eprintln!("  Bands:             {}", best.record.b);
            eprintln!("  Threshold:         {}", best.record.threshold);
            eprintln!("  Avg F1*:           {:.4}", best.record.avg_f1_star);
            eprintln!("  Avg final F1:      {:.4}", best.record.avg_final_f1);
        }
        None => eprintln!("No configuration produced a usable repetition"),
    }
    eprintln!();
    eprintln!("Total time: {:.3}s", summary.elapsed_secs);
    Ok(())
}

fn validate_hashing(hashing: &HashingArgs) {
    if hashing.num_hashes == Some(0) {
        fail("num-hashes must be > 0");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "catalog-dedup", &mut io::stdout());
            Ok(())
        }
        Commands::Signatures {
            input,
            output,
            blocking,
            hashing,
        } => {
            validate_hashing(hashing);
            run_signatures(&cli, input, output, blocking, hashing)
        }
        Commands::Detect {
            input,
            rows_per_band,
            bands,
            threshold,
            hashing,
            output,
        } => {
            validate_hashing(hashing);
            if *rows_per_band == 0 || *bands == 0 {
                fail("rows-per-band and bands must be > 0");
            }
            if !(0.0..=1.0).contains(threshold) {
                fail("threshold must be between 0.0 and 1.0");
            }
            run_detect(
                &cli,
                input,
                *rows_per_band,
                *bands,
                *threshold,
                hashing,
                output.as_deref(),
            )
        }
        Commands::Tune {
            input,
            grid,
            repetitions,
            sequential,
            blocking,
            hashing,
            output,
        } => {
            validate_hashing(hashing);
            if *repetitions == 0 {
                fail("repetitions must be > 0");
            }
            run_tune(
                &cli,
                input,
                grid.as_deref(),
                *repetitions,
                *sequential,
                blocking,
                hashing,
                output.as_deref(),
            )
        }
    }
}
