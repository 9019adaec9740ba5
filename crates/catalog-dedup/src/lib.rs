//! # catalog-dedup
//!
//! Approximate duplicate detection for product catalogs.
//!
//! Items are columns of a boolean token matrix. The pipeline runs left to right:
//!
//! ```text
//! BinaryMatrix ─▶ minhash ─▶ SignatureMatrix ─▶ lsh ─▶ candidate pairs
//!                                                        │
//!      metrics ◀─ evaluation ◀─ clusters ◀─ cluster ◀─ similarity
//! ```
//!
//! [`bootstrap`] wraps the chain in a resampling loop that tunes the band
//! geometry and the clustering threshold against known duplicate pairs.
//! [`blocking`], [`features`] and [`io`] turn catalog records into matrices and
//! persist them.
//!
//! ## Quick Start
//!
//! ```
//! use catalog_dedup::{features::FeatureMatrixBuilder, DedupConfig, Deduplicator};
//!
//! let items = vec![
//!     vec!["55inch", "oled", "sony"],
//!     vec!["55inch", "oled", "sony"],
//!     vec!["32inch", "lcd", "lg"],
//! ];
//! let features = FeatureMatrixBuilder::new().build(&items);
//!
//! let config = DedupConfig::default()
//!     .with_num_hashes(6)
//!     .with_bands(2, 3)
//!     .with_threshold(0.5);
//! let result = Deduplicator::new(config).run(&features.matrix).unwrap();
//! assert!(result.candidates.pairs.contains(&(0, 1)));
//! ```

use std::collections::BTreeMap;

pub mod blocking;
pub mod bootstrap;
pub mod cluster;
pub mod evaluation;
pub mod features;
pub mod io;
pub mod lsh;
pub mod minhash;
pub mod pipeline;
pub mod similarity;

pub use bootstrap::{BootstrapConfig, BootstrapHarness, ParameterGrid, SkipReason, TuningReport};
pub use cluster::{cluster, ClusterAssignment, ClusterError, Dendrogram};
pub use evaluation::{select_best, EvaluationRecord, GroundTruth};
pub use lsh::{lsh, BandReconciliation, CandidateSet, LshIndex};
pub use minhash::{generate_signature_matrix, MinHashError, MinHasher};
pub use pipeline::{DedupConfig, DedupError, DedupResult, DedupStats, Deduplicator};
pub use similarity::{jaccard_distances, SimilarityError};

/// Column index of an item in a matrix.
pub type ItemId = usize;

/// Unordered item pair, stored with the smaller id first.
pub type ItemPair = (ItemId, ItemId);

/// Token presence matrix: rows are tokens, columns are items.
pub type BinaryMatrix = catalog_core::Matrix<bool>;

/// MinHash signatures: rows are hash functions, columns are items.
pub type SignatureMatrix = catalog_core::Matrix<u64>;

/// Jaccard dissimilarity per candidate pair.
pub type DistanceMap = BTreeMap<ItemPair, f64>;

/// Order a pair so the smaller id comes first.
#[inline]
#[must_use]
pub fn canonical_pair(i: ItemId, j: ItemId) -> ItemPair {
    if i <= j {
        (i, j)
    } else {
        (j, i)
    }
}
