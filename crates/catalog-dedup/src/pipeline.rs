//! One pass of the detection chain with fixed parameters.

use crate::cluster::{cluster, ClusterAssignment};
use crate::lsh::{lsh, CandidateSet};
use crate::minhash::{MinHashError, MinHasher, DEFAULT_SEED};
use crate::similarity::{jaccard_distances, SimilarityError};
use crate::{BinaryMatrix, DistanceMap, SignatureMatrix};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from [`Deduplicator::run`].
#[derive(Debug, Error)]
pub enum DedupError {
    /// Signature generation failed.
    #[error("signature generation failed: {0}")]
    MinHash(#[from] MinHashError),

    /// Distance computation failed.
    #[error("distance computation failed: {0}")]
    Similarity(#[from] SimilarityError),

    /// Signatures and feature matrix describe different items.
    #[error("signature matrix has {signatures} items, feature matrix has {features}")]
    ItemCountMismatch {
        /// Columns in the signature matrix.
        signatures: usize,
        /// Columns in the feature matrix.
        features: usize,
    },
}

/// Parameters for a single detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Hash functions per signature. `None` uses `rows_per_band * num_bands`.
    pub num_hashes: Option<usize>,
    /// Seed for the hash family.
    pub seed: u64,
    /// Rows per band (r).
    pub rows_per_band: usize,
    /// Number of bands (b).
    pub num_bands: usize,
    /// Maximum complete-linkage distance inside a cluster.
    pub threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            num_hashes: None,
            seed: DEFAULT_SEED,
            rows_per_band: 5,
            num_bands: 20,
            threshold: 0.5,
        }
    }
}

impl DedupConfig {
    /// Set the hash count.
    #[must_use]
    pub fn with_num_hashes(mut self, num_hashes: usize) -> Self {
        self.num_hashes = Some(num_hashes);
        self
    }

    /// Set the hash-family seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the band geometry.
    #[must_use]
    pub fn with_bands(mut self, rows_per_band: usize, num_bands: usize) -> Self {
        self.rows_per_band = rows_per_band;
        self.num_bands = num_bands;
        self
    }

    /// Set the clustering threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Hash count actually used: the explicit count, else `r·b` floored at 1.
    #[must_use]
    pub fn effective_num_hashes(&self) -> usize {
        self.num_hashes
            .unwrap_or_else(|| self.rows_per_band.saturating_mul(self.num_bands).max(1))
    }
}

/// Summary of a detection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Items (matrix columns).
    pub items: usize,
    /// Token rows.
    pub tokens: usize,
    /// Signature rows.
    pub num_hashes: usize,
    /// Candidate pairs after banding.
    pub candidate_pairs: usize,
    /// Candidate pairs over all `n(n-1)/2` pairs.
    pub fraction_of_comparisons: f64,
    /// Clusters with more than one member.
    pub duplicate_groups: usize,
    /// Items inside those clusters.
    pub duplicate_items: usize,
    /// The candidate graph was incomplete, so no clusters were formed.
    pub clustering_aborted: bool,
}

/// Everything produced by one pass.
#[derive(Debug, Clone)]
pub struct DedupResult {
    /// MinHash signatures of every item.
    pub signatures: SignatureMatrix,
    /// Candidate pairs from banding.
    pub candidates: CandidateSet,
    /// Exact Jaccard distance per candidate.
    pub distances: DistanceMap,
    /// Clusters over the items that appear in a candidate pair.
    pub clusters: ClusterAssignment,
    /// Summary counts.
    pub stats: DedupStats,
}

/// Fraction of the `n(n-1)/2` possible comparisons that `candidates` represents.
#[must_use]
pub fn fraction_of_comparisons(candidates: usize, num_items: usize) -> f64 {
    let total = num_items.saturating_mul(num_items.saturating_sub(1)) / 2;
    if total == 0 {
        0.0
    } else {
        candidates as f64 / total as f64
    }
}

/// Runs MinHash, LSH, exact distances and clustering with one configuration.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    /// Create a deduplicator.
    #[must_use]
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Run the full chain on a feature matrix.
    pub fn run(&self, binary: &BinaryMatrix) -> Result<DedupResult, DedupError> {
        let hasher = MinHasher::with_seed(
            binary.rows(),
            self.config.effective_num_hashes(),
            self.config.seed,
        )?;
        let signatures = hasher.signature_matrix(binary)?;
        self.run_with_signatures(binary, signatures)
    }

    /// Run banding, distances and clustering on precomputed signatures.
    pub fn run_with_signatures(
        &self,
        binary: &BinaryMatrix,
        signatures: SignatureMatrix,
    ) -> Result<DedupResult, DedupError> {
        if signatures.cols() != binary.cols() {
            return Err(DedupError::ItemCountMismatch {
                signatures: signatures.cols(),
                features: binary.cols(),
            });
        }

        let candidates = lsh(&signatures, self.config.rows_per_band, self.config.num_bands);

        let distances = jaccard_distances(binary, &candidates.pairs)?;

        let (clusters, clustering_aborted) = match cluster(&distances, self.config.threshold) {
            Ok(clusters) => (clusters, false),
            Err(e) => {
                warn!(error = %e, "Clustering aborted");
                (ClusterAssignment::default(), true)
            }
        };

        let stats = DedupStats {
            items: binary.cols(),
            tokens: binary.rows(),
            num_hashes: signatures.rows(),
            candidate_pairs: candidates.len(),
            fraction_of_comparisons: fraction_of_comparisons(candidates.len(), binary.cols()),
            duplicate_groups: clusters.duplicate_groups().count(),
            duplicate_items: clusters.duplicate_groups().map(Vec::len).sum(),
            clustering_aborted,
        };

        info!(
            items = stats.items,
            candidates = stats.candidate_pairs,
            groups = stats.duplicate_groups,
            "Detection pass complete"
        );

        Ok(DedupResult {
            signatures,
            candidates,
            distances,
            clusters,
            stats,
        })
    }
}
