//! Bootstrap tuning of band geometry and clustering threshold.
//!
//! For every `(r, b, threshold)` in a [`ParameterGrid`] the harness draws
//! `K` bootstrap samples of the item columns, runs banding, distances and
//! clustering on each training sample, scores the result against the known
//! duplicates inside the sample and averages the scores.
//!
//! Every repetition seeds its own RNG from `(seed, r, b, threshold, repetition)`,
//! so a report is identical whether combinations run sequentially or on the
//! rayon pool.

use crate::cluster::cluster;
use crate::evaluation::{evaluate_candidates, evaluate_clusters, select_best, CandidateMetrics, EvaluationRecord, GroundTruth};
use crate::lsh::{BandReconciliation, LshIndex};
use crate::minhash::DEFAULT_SEED;
use crate::similarity::jaccard_distances;
use crate::{canonical_pair, BinaryMatrix, ItemId, ItemPair, SignatureMatrix};
use catalog_core::hashing::derive_seed;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Hyperparameter values to search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    /// Candidate rows-per-band values.
    pub rows_per_band: Vec<usize>,
    /// Candidate band counts.
    pub num_bands: Vec<usize>,
    /// Candidate clustering thresholds.
    pub thresholds: Vec<f64>,
}

impl Default for ParameterGrid {
    fn default() -> Self {
        Self::original()
    }
}

impl ParameterGrid {
    /// Grid with explicit values.
    #[must_use]
    pub fn new(rows_per_band: Vec<usize>, num_bands: Vec<usize>, thresholds: Vec<f64>) -> Self {
        Self {
            rows_per_band,
            num_bands,
            thresholds,
        }
    }

    /// A single combination.
    #[must_use]
    pub fn single(rows_per_band: usize, num_bands: usize, threshold: f64) -> Self {
        Self::new(vec![rows_per_band], vec![num_bands], vec![threshold])
    }

    /// The grid of the television-catalog study.
    #[must_use]
    pub fn original() -> Self {
        Self::new(
            vec![5, 10, 15, 20, 25, 30, 40, 50, 60, 70, 80, 100, 200],
            vec![2, 4, 6, 8, 10, 20, 30, 40, 50, 60, 80, 100, 200],
            vec![0.5, 0.7, 0.6],
        )
    }

    /// Parse a grid from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Every combination, `r` outermost and threshold innermost.
    #[must_use]
    pub fn combinations(&self) -> Vec<(usize, usize, f64)> {
        let mut combos = Vec::with_capacity(self.len());
        for &r in &self.rows_per_band {
            for &b in &self.num_bands {
                for &t in &self.thresholds {
                    combos.push((r, b, t));
                }
            }
        }
        combos
    }

    /// Number of combinations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows_per_band.len() * self.num_bands.len() * self.thresholds.len()
    }

    /// True when the grid has no combinations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Bootstrap repetitions per combination (K).
    pub repetitions: usize,
    /// Draws per sample as a fraction of the item count.
    pub sample_fraction: f64,
    /// Base seed for every repetition.
    pub seed: u64,
    /// Evaluate combinations on the rayon pool.
    pub parallel: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            repetitions: 10,
            sample_fraction: 0.63,
            seed: DEFAULT_SEED,
            parallel: true,
        }
    }
}

impl BootstrapConfig {
    /// Set the repetition count.
    #[must_use]
    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Set the sample fraction.
    #[must_use]
    pub fn with_sample_fraction(mut self, fraction: f64) -> Self {
        self.sample_fraction = fraction;
        self
    }

    /// Set the base seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enable or disable parallel evaluation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Why a unit of work produced no metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The signature matrix has no item columns.
    EmptyMatrix,
    /// Feature and signature matrices disagree on the item count.
    MatrixMismatch,
    /// `r·b` exceeds the signature rows or overflows.
    InvalidGeometry,
    /// The training or test sample holds no known duplicate pair.
    EmptyGroundTruth,
    /// Banding produced no candidate pair.
    NoCandidates,
    /// The candidate graph was incomplete, so clustering was aborted.
    ClusteringAborted,
    /// Clustering returned no clusters.
    EmptyClustering,
    /// Every repetition of a combination was skipped.
    NoSuccessfulRepetition,
}

/// Records and skip counts from one tuning run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    /// One record per combination with at least one successful repetition.
    pub records: Vec<EvaluationRecord>,
    /// Skipped units by reason.
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Evaluated combinations whose signature rows were padded or truncated
    /// to fit `r·b`.
    #[serde(default)]
    pub reconciled: usize,
}

impl TuningReport {
    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    fn absorb(&mut self, outcome: CombinationOutcome) {
        self.records.extend(outcome.record);
        for (reason, count) in outcome.skipped {
            *self.skipped.entry(reason).or_default() += count;
        }
        if outcome.reconciliation.is_lossy() {
            self.reconciled += 1;
        }
    }

    /// Record with the highest average F1*.
    #[must_use]
    pub fn best(&self) -> Option<&EvaluationRecord> {
        select_best(&self.records)
    }

    /// Total skipped units.
    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// One pre-partitioned block to tune.
#[derive(Debug, Clone, Copy)]
pub struct BlockInput<'a> {
    /// Block key, used only for reporting.
    pub key: &'a str,
    /// Block signatures.
    pub signatures: &'a SignatureMatrix,
    /// Block features for exact distances; `None` falls back to signature presence.
    pub features: Option<&'a BinaryMatrix>,
    /// Known duplicates in block-local ids.
    pub truth: &'a GroundTruth,
}

/// Scores of one successful repetition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RepetitionMetrics {
    pub(crate) candidates: CandidateMetrics,
    pub(crate) final_f1: f64,
}

/// Result of evaluating one grid combination.
struct CombinationOutcome {
    record: Option<EvaluationRecord>,
    skipped: BTreeMap<SkipReason, usize>,
    reconciliation: BandReconciliation,
}

struct Inputs<'a> {
    signatures: &'a SignatureMatrix,
    features: Cow<'a, BinaryMatrix>,
    truth: &'a GroundTruth,
}

/// Draw a bootstrap split of `0..num_items`.
///
/// The training sample has `max(1, ⌊fraction·N⌋)` draws with replacement and
/// the test set is every item never drawn. When every item was drawn, the last
/// drawn item is held out and all of its draws leave the training sample.
pub(crate) fn bootstrap_split(num_items: usize, fraction: f64, rng: &mut StdRng) -> (Vec<ItemId>, Vec<ItemId>) {
    if num_items == 0 {
        return (Vec::new(), Vec::new());
    }

    let draws = ((fraction * num_items as f64).floor() as usize).max(1);
    let mut train: Vec<ItemId> = (0..draws).map(|_| rng.gen_range(0..num_items)).collect();
    let drawn: BTreeSet<ItemId> = train.iter().copied().collect();
    let mut test: Vec<ItemId> = (0..num_items).filter(|i| !drawn.contains(i)).collect();

    if test.is_empty() {
        if let Some(&held) = train.last() {
            train.retain(|&i| i != held);
            test.push(held);
        }
    }

    (train, test)
}

/// Grid search driver.
#[derive(Debug, Clone, Default)]
pub struct BootstrapHarness {
    grid: ParameterGrid,
    config: BootstrapConfig,
}

impl BootstrapHarness {
    /// Create a harness.
    #[must_use]
    pub fn new(grid: ParameterGrid, config: BootstrapConfig) -> Self {
        Self { grid, config }
    }

    /// Grid being searched.
    #[must_use]
    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    /// Resampling parameters.
    #[must_use]
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Tune one matrix.
    ///
    /// `truth` uses the column indices of `signatures`. Distances come from
    /// `features` when given; otherwise a signature entry counts as a present
    /// feature when it is non-zero.
    pub fn run(
        &self,
        signatures: &SignatureMatrix,
        features: Option<&BinaryMatrix>,
        truth: &GroundTruth,
    ) -> TuningReport {
        let mut report = TuningReport::default();

        if signatures.cols() == 0 {
            debug!("Signature matrix has no columns, skipping");
            report.skip(SkipReason::EmptyMatrix);
            return report;
        }

        let features = match features {
            Some(f) if f.cols() != signatures.cols() => {
                warn!(
                    signature_items = signatures.cols(),
                    feature_items = f.cols(),
                    "Feature matrix does not match signatures, skipping"
                );
                report.skip(SkipReason::MatrixMismatch);
                return report;
            }
            Some(f) => Cow::Borrowed(f),
            None => Cow::Owned(signatures.map(|&v| v != 0)),
        };

        let inputs = Inputs {
            signatures,
            features,
            truth,
        };

        let combos = self.grid.combinations();
        let outcomes: Vec<_> = if self.config.parallel {
            combos
                .par_iter()
                .map(|&(r, b, t)| self.evaluate_combination(&inputs, r, b, t))
                .collect()
        } else {
            combos
                .iter()
                .map(|&(r, b, t)| self.evaluate_combination(&inputs, r, b, t))
                .collect()
        };

        for outcome in outcomes {
            report.absorb(outcome);
        }

        info!(
            items = signatures.cols(),
            combinations = combos.len(),
            records = report.records.len(),
            skipped = report.total_skipped(),
            reconciled = report.reconciled,
            "Bootstrap tuning complete"
        );

        report
    }

    /// Tune every block independently.
    ///
    /// Use [`best_across_blocks`] to pick the winner over all blocks.
    pub fn run_blocks(&self, blocks: &[BlockInput<'_>]) -> BTreeMap<String, TuningReport> {
        blocks
            .iter()
            .map(|block| {
                debug!(block = block.key, items = block.signatures.cols(), "Tuning block");
                let report = self.run(block.signatures, block.features, block.truth);
                (block.key.to_string(), report)
            })
            .collect()
    }

    fn evaluate_combination(
        &self,
        inputs: &Inputs<'_>,
        r: usize,
        b: usize,
        threshold: f64,
    ) -> CombinationOutcome {
        let mut skipped = BTreeMap::new();
        let rows = inputs.signatures.rows();

        if r.checked_mul(b).map_or(true, |band_rows| band_rows > rows) {
            debug!(r, b, rows, "Band geometry exceeds signature rows, skipping");
            skipped.insert(SkipReason::InvalidGeometry, 1);
            return CombinationOutcome {
                record: None,
                skipped,
                reconciliation: BandReconciliation::Exact,
            };
        }

        let reconciliation = LshIndex::new(r, b).reconciliation(rows);
        if reconciliation.is_lossy() {
            warn!(r, b, rows, ?reconciliation, "Signature rows do not match r*b; bands were adjusted");
        }

        let mut successes = Vec::with_capacity(self.config.repetitions);
        for repetition in 0..self.config.repetitions {
            match self.run_repetition(inputs, r, b, threshold, repetition) {
                Ok(metrics) => successes.push(metrics),
                Err(reason) => {
                    debug!(r, b, threshold, repetition, ?reason, "Repetition skipped");
                    *skipped.entry(reason).or_default() += 1;
                }
            }
        }

        if successes.is_empty() {
            *skipped.entry(SkipReason::NoSuccessfulRepetition).or_default() += 1;
            return CombinationOutcome {
                record: None,
                skipped,
                reconciliation,
            };
        }

        let n = successes.len() as f64;
        let mean = |f: fn(&RepetitionMetrics) -> f64| successes.iter().map(f).sum::<f64>() / n;

        let record = EvaluationRecord {
            r,
            b,
            threshold,
            fraction_of_comparisons: mean(|m| m.candidates.fraction_of_comparisons),
            avg_pair_quality: mean(|m| m.candidates.pair_quality),
            avg_pair_completeness: mean(|m| m.candidates.pair_completeness),
            avg_f1_star: mean(|m| m.candidates.f1_star),
            avg_final_f1: mean(|m| m.final_f1),
        };
        CombinationOutcome {
            record: Some(record),
            skipped,
            reconciliation,
        }
    }

    fn run_repetition(
        &self,
        inputs: &Inputs<'_>,
        r: usize,
        b: usize,
        threshold: f64,
        repetition: usize,
    ) -> Result<RepetitionMetrics, SkipReason> {
        let num_items = inputs.signatures.cols();
        let seed = derive_seed(
            self.config.seed,
            &[r as u64, b as u64, threshold.to_bits(), repetition as u64],
        );
        let mut rng = StdRng::seed_from_u64(seed);

        let (train, test) = bootstrap_split(num_items, self.config.sample_fraction, &mut rng);
        let train_set: BTreeSet<ItemId> = train.iter().copied().collect();
        let test_set: BTreeSet<ItemId> = test.iter().copied().collect();

        let (train_truth, test_truth) = inputs.truth.partition(&train_set, &test_set);
        if train_truth.is_empty() || test_truth.is_empty() {
            return Err(SkipReason::EmptyGroundTruth);
        }

        let train_signatures = inputs
            .signatures
            .select_columns(&train)
            .map_err(|_| SkipReason::MatrixMismatch)?;

        // Sample-local columns back to item ids; repeated draws of one item
        // collide with themselves and are dropped.
        let candidates: BTreeSet<ItemPair> = LshIndex::new(r, b)
            .candidate_pairs(&train_signatures)
            .pairs
            .into_iter()
            .map(|(i, j)| (train[i], train[j]))
            .filter(|(i, j)| i != j)
            .map(|(i, j)| canonical_pair(i, j))
            .collect();
        if candidates.is_empty() {
            return Err(SkipReason::NoCandidates);
        }

        let candidate_metrics = evaluate_candidates(&candidates, &train_truth, num_items);

        let distances = jaccard_distances(&inputs.features, &candidates).map_err(|_| SkipReason::MatrixMismatch)?;
        let clusters = cluster(&distances, threshold).map_err(|_| SkipReason::ClusteringAborted)?;
        if clusters.is_empty() {
            return Err(SkipReason::EmptyClustering);
        }

        // Scored against the training duplicates, like the candidate metrics.
        let final_metrics = evaluate_clusters(&clusters.predicted_pairs(), &train_truth);

        Ok(RepetitionMetrics {
            candidates: candidate_metrics,
            final_f1: final_metrics.f1,
        })
    }
}

/// Best record over all blocks, with its block key. Earlier blocks win ties.
#[must_use]
pub fn best_across_blocks(reports: &BTreeMap<String, TuningReport>) -> Option<(&str, &EvaluationRecord)> {
    reports
        .iter()
        .flat_map(|(key, report)| report.records.iter().map(move |record| (key.as_str(), record)))
        .fold(None, |best, (key, record)| match best {
            Some((_, current)) if current.avg_f1_star >= record.avg_f1_star => best,
            _ => Some((key, record)),
        })
}
