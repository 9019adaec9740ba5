//! Locality-Sensitive Hashing (LSH) for candidate pair generation.
//!
//! The signature matrix is cut into `b` bands of `r` rows. Within a band each
//! item's `r`-row slice is digested into a bucket key, and items sharing a
//! bucket in any band become candidate pairs. Two items with similarity `s`
//! become candidates with probability `1 - (1 - s^r)^b`.

use crate::{canonical_pair, ItemPair, SignatureMatrix};
use catalog_core::hashing::{band_digest, Digest};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// How the signature rows were fitted to the band geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandReconciliation {
    /// `r·b` equals the signature row count.
    Exact,
    /// Zero rows were appended to reach `r·b`.
    Padded {
        /// Rows added.
        added: usize,
    },
    /// Trailing rows were dropped to reach `r·b`.
    Truncated {
        /// Rows dropped.
        dropped: usize,
    },
    /// `r·b` does not fit in `usize`; no bands were formed.
    Overflow,
}

impl BandReconciliation {
    /// True when the signature rows were altered.
    #[must_use]
    pub fn is_lossy(&self) -> bool {
        !matches!(self, Self::Exact)
    }

    fn between(signature_rows: usize, target_rows: usize) -> Self {
        match signature_rows.cmp(&target_rows) {
            std::cmp::Ordering::Equal => Self::Exact,
            std::cmp::Ordering::Less => Self::Padded {
                added: target_rows - signature_rows,
            },
            std::cmp::Ordering::Greater => Self::Truncated {
                dropped: signature_rows - target_rows,
            },
        }
    }
}

/// Candidate pairs produced by one banding pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    /// Canonical `(i, j)` pairs with `i < j`, column indices of the input matrix.
    pub pairs: BTreeSet<ItemPair>,
    /// Row reconciliation applied before banding.
    pub reconciliation: BandReconciliation,
    /// Buckets holding two or more items, summed over bands.
    pub collision_buckets: usize,
}

impl CandidateSet {
    fn empty(reconciliation: BandReconciliation) -> Self {
        Self {
            pairs: BTreeSet::new(),
            reconciliation,
            collision_buckets: 0,
        }
    }

    /// Number of candidate pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no pairs were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Probability that two items with similarity `s` become candidates under
/// `r` rows per band and `b` bands.
#[must_use]
pub fn candidate_probability(similarity: f64, rows_per_band: usize, num_bands: usize) -> f64 {
    let band = similarity.powi(rows_per_band as i32);
    1.0 - (1.0 - band).powi(num_bands as i32)
}

/// Banding geometry for LSH candidate generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LshIndex {
    rows_per_band: usize,
    num_bands: usize,
}

impl LshIndex {
    /// Create an index with `rows_per_band` (r) rows in each of `num_bands` (b) bands.
    #[must_use]
    pub fn new(rows_per_band: usize, num_bands: usize) -> Self {
        Self {
            rows_per_band,
            num_bands,
        }
    }

    /// Create an index whose S-curve midpoint is closest to `threshold`,
    /// using exactly `num_hashes` rows.
    #[must_use]
    pub fn with_threshold(num_hashes: usize, threshold: f64) -> Self {
        let (num_bands, rows_per_band) = Self::optimize_params(num_hashes, threshold);
        Self::new(rows_per_band, num_bands)
    }

    /// Find `(num_bands, rows_per_band)` with `b·r = n` whose threshold
    /// `(1/b)^(1/r)` is closest to `t`.
    fn optimize_params(n: usize, t: f64) -> (usize, usize) {
        let mut best = (1, n.max(1));
        let mut best_diff = f64::MAX;

        for b in 1..=n {
            if n % b == 0 {
                let r = n / b;
                let estimated_t = (1.0 / b as f64).powf(1.0 / r as f64);
                let diff = (estimated_t - t).abs();
                if diff < best_diff {
                    best = (b, r);
                    best_diff = diff;
                }
            }
        }

        best
    }

    /// Rows per band (r).
    #[must_use]
    pub fn rows_per_band(&self) -> usize {
        self.rows_per_band
    }

    /// Number of bands (b).
    #[must_use]
    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    /// Signature rows consumed by the bands (`r·b`), or `None` when the
    /// product overflows.
    #[must_use]
    pub fn band_rows(&self) -> Option<usize> {
        self.rows_per_band.checked_mul(self.num_bands)
    }

    /// How a matrix with `signature_rows` rows is fitted to this geometry.
    #[must_use]
    pub fn reconciliation(&self, signature_rows: usize) -> BandReconciliation {
        match self.band_rows() {
            Some(target_rows) => BandReconciliation::between(signature_rows, target_rows),
            None => BandReconciliation::Overflow,
        }
    }

    /// Generate candidate pairs over the columns of `signatures`.
    ///
    /// A geometry with no bands, empty bands or an `r·b` that overflows yields
    /// an empty set. Padding rows are zeros and are never materialised.
    pub fn candidate_pairs(&self, signatures: &SignatureMatrix) -> CandidateSet {
        let Some(target_rows) = self.band_rows() else {
            warn!(
                rows_per_band = self.rows_per_band,
                num_bands = self.num_bands,
                "Band geometry overflows; no bands formed"
            );
            return CandidateSet::empty(BandReconciliation::Overflow);
        };
        let reconciliation = BandReconciliation::between(signatures.rows(), target_rows);

        if target_rows == 0 {
            debug!(
                rows_per_band = self.rows_per_band,
                num_bands = self.num_bands,
                "Band geometry produces no bands"
            );
            return CandidateSet::empty(reconciliation);
        }

        if reconciliation.is_lossy() {
            debug!(
                signature_rows = signatures.rows(),
                target_rows,
                ?reconciliation,
                "Reconciling signature rows to band geometry"
            );
        }

        let num_items = signatures.cols();
        let mut pairs = BTreeSet::new();
        let mut collision_buckets: usize = 0;

        // Bands starting at or past the last signature row hold only padding,
        // so every item lands in the same bucket.
        let real_bands = signatures
            .rows()
            .div_ceil(self.rows_per_band)
            .min(self.num_bands);
        let padding_bands = self.num_bands - real_bands;
        if padding_bands > 0 && num_items > 1 {
            collision_buckets = padding_bands;
            for i in 0..num_items {
                for j in i + 1..num_items {
                    pairs.insert((i, j));
                }
            }
        }

        for band in 0..real_bands {
            let buckets = self.band_buckets(signatures, band);
            debug!(band, buckets = buckets.len(), "Band bucketed");

            for members in buckets.values().filter(|m| m.len() > 1) {
                collision_buckets += 1;
                for (k, &i) in members.iter().enumerate() {
                    for &j in &members[k + 1..] {
                        pairs.insert(canonical_pair(i, j));
                    }
                }
            }
        }

        debug!(
            items = num_items,
            candidates = pairs.len(),
            "Generated candidate pairs"
        );

        CandidateSet {
            pairs,
            reconciliation,
            collision_buckets,
        }
    }

    /// Group item columns of one band by the digest of their band slice.
    ///
    /// Rows past the end of `signatures` are padding zeros shared by every
    /// item, so only the real rows of the slice are digested.
    fn band_buckets(&self, signatures: &SignatureMatrix, band: usize) -> HashMap<Digest, Vec<usize>> {
        let start = band * self.rows_per_band;
        let end = start.saturating_add(self.rows_per_band).min(signatures.rows());
        let mut buckets: HashMap<Digest, Vec<usize>> = HashMap::new();
        let mut slice = Vec::with_capacity(end - start);

        for col in 0..signatures.cols() {
            slice.clear();
            slice.extend((start..end).map(|row| signatures[(row, col)]));
            buckets
                .entry(band_digest(&slice))
                .or_default()
                .push(col);
        }

        buckets
    }
}

/// Run LSH on `signatures` with geometry `(r, b)`, warning when the rows had
/// to be padded or truncated.
pub fn lsh(signatures: &SignatureMatrix, rows_per_band: usize, num_bands: usize) -> CandidateSet {
    let result = LshIndex::new(rows_per_band, num_bands).candidate_pairs(signatures);
    if result.reconciliation.is_lossy() {
        warn!(
            signature_rows = signatures.rows(),
            rows_per_band,
            num_bands,
            reconciliation = ?result.reconciliation,
            "Signature rows do not match r*b; bands were adjusted"
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHasher;
    use crate::test_support::binary_from_columns;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn signatures(rows: Vec<Vec<u64>>) -> SignatureMatrix {
        SignatureMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn test_identical_columns_are_candidates() {
        let sig = signatures(vec![vec![1, 1, 9], vec![2, 2, 8], vec![3, 3, 7], vec![4, 4, 6]]);
        let result = LshIndex::new(2, 2).candidate_pairs(&sig);

        assert_eq!(result.reconciliation, BandReconciliation::Exact);
        assert_eq!(result.pairs, BTreeSet::from([(0, 1)]));
    }

    #[test]
    fn test_single_band_agreement_suffices() {
        // Columns 0 and 2 agree on band 1 only.
        let sig = signatures(vec![vec![1, 5, 9], vec![2, 6, 9], vec![3, 7, 3], vec![4, 8, 4]]);
        let result = LshIndex::new(2, 2).candidate_pairs(&sig);
        assert_eq!(result.pairs, BTreeSet::from([(0, 2)]));
        assert_eq!(result.collision_buckets, 1);
    }

    #[test]
    fn test_candidate_deduplication() {
        let sig = signatures(vec![vec![1, 1, 1], vec![2, 2, 2], vec![3, 3, 3], vec![4, 4, 4]]);
        let result = LshIndex::new(1, 4).candidate_pairs(&sig);

        // Every band proposes the same three pairs.
        assert_eq!(result.pairs, BTreeSet::from([(0, 1), (0, 2), (1, 2)]));
        assert_eq!(result.collision_buckets, 4);
    }

    #[test]
    fn test_padding_is_reported() {
        let sig = signatures(vec![vec![1, 1], vec![2, 3]]);
        let result = LshIndex::new(2, 2).candidate_pairs(&sig);

        assert_eq!(result.reconciliation, BandReconciliation::Padded { added: 2 });
        // The padded band is all zeros, so every column shares it.
        assert_eq!(result.pairs, BTreeSet::from([(0, 1)]));
    }

    #[test]
    fn test_truncation_is_reported() {
        let sig = signatures(vec![vec![1, 2], vec![1, 1], vec![5, 5]]);
        let result = lsh(&sig, 1, 2);

        assert_eq!(result.reconciliation, BandReconciliation::Truncated { dropped: 1 });
        assert_eq!(result.pairs, BTreeSet::from([(0, 1)]));
    }

    #[test]
    fn test_zero_geometry_yields_empty_set() {
        let sig = signatures(vec![vec![1, 1], vec![2, 2]]);
        assert!(LshIndex::new(0, 3).candidate_pairs(&sig).is_empty());
        assert!(LshIndex::new(2, 0).candidate_pairs(&sig).is_empty());
    }

    #[test]
    fn test_overflowing_geometry_yields_empty_set() {
        let sig = SignatureMatrix::filled(4, 3, 1);
        let result = lsh(&sig, 1 << 40, 1 << 40);

        assert!(result.is_empty());
        assert_eq!(result.reconciliation, BandReconciliation::Overflow);
        assert!(result.reconciliation.is_lossy());
        assert_eq!(LshIndex::new(usize::MAX, 2).band_rows(), None);
    }

    #[test]
    fn test_huge_band_is_padded_without_allocating() {
        let sig = SignatureMatrix::filled(4, 3, 1);
        let result = LshIndex::new(1 << 33, 1).candidate_pairs(&sig);

        assert_eq!(
            result.reconciliation,
            BandReconciliation::Padded { added: (1 << 33) - 4 }
        );
        assert_eq!(result.pairs, BTreeSet::from([(0, 1), (0, 2), (1, 2)]));
    }

    #[test]
    fn test_many_padding_bands() {
        // Two real rows, then a huge number of all-zero bands.
        let sig = signatures(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let result = LshIndex::new(2, 1 << 40).candidate_pairs(&sig);

        assert_eq!(result.pairs, BTreeSet::from([(0, 1), (0, 2), (1, 2)]));
        assert_eq!(result.collision_buckets, (1 << 40) - 1);
    }

    #[test]
    fn test_partially_padded_band_matches_explicit_zeros() {
        let sig = signatures(vec![vec![1, 1, 2], vec![3, 4, 3], vec![5, 5, 5]]);
        let explicit = signatures(vec![
            vec![1, 1, 2],
            vec![3, 4, 3],
            vec![5, 5, 5],
            vec![0, 0, 0],
        ]);

        let padded = LshIndex::new(2, 2).candidate_pairs(&sig);
        assert_eq!(padded.reconciliation, BandReconciliation::Padded { added: 1 });
        assert_eq!(padded.pairs, LshIndex::new(2, 2).candidate_pairs(&explicit).pairs);
        assert_eq!(padded.pairs, BTreeSet::from([(0, 1), (0, 2), (1, 2)]));
    }

    #[test]
    fn test_reconciliation_without_banding() {
        let index = LshIndex::new(1, 10);
        assert_eq!(index.reconciliation(20), BandReconciliation::Truncated { dropped: 10 });
        assert_eq!(index.reconciliation(10), BandReconciliation::Exact);
        assert_eq!(LshIndex::new(1 << 40, 1 << 40).reconciliation(4), BandReconciliation::Overflow);
    }

    #[test]
    fn test_empty_matrix() {
        let sig = SignatureMatrix::filled(4, 0, 0);
        let result = LshIndex::new(2, 2).candidate_pairs(&sig);
        assert!(result.is_empty());
    }

    #[test]
    fn test_with_threshold() {
        let index = LshIndex::with_threshold(128, 0.85);
        assert_eq!(index.band_rows(), Some(128));
        assert!(index.num_bands() > 0);
        assert!(index.rows_per_band() > 0);

        for threshold in [0.5, 0.7, 0.9, 0.95] {
            let (b, r) = LshIndex::optimize_params(120, threshold);
            assert_eq!(b * r, 120);
        }
    }

    #[test]
    fn test_candidate_probability_shape() {
        assert!((candidate_probability(1.0, 5, 10) - 1.0).abs() < 1e-12);
        assert!(candidate_probability(0.0, 5, 10).abs() < 1e-12);
        let p = candidate_probability(0.5, 2, 3);
        assert!((p - (1.0 - 0.75f64.powi(3))).abs() < 1e-12);
        // More bands raise recall, more rows lower it.
        assert!(candidate_probability(0.5, 2, 6) > p);
        assert!(candidate_probability(0.5, 4, 3) < p);
    }

    #[test]
    fn test_empirical_capture_rate_matches_s_curve() {
        let mut universe: Vec<usize> = (0..1000).collect();
        universe.shuffle(&mut StdRng::seed_from_u64(11));
        // J = 50 / 100 = 0.5
        let binary = binary_from_columns(1000, &[&universe[0..75], &universe[25..100]]);

        let (r, b) = (2, 3);
        let trials = 400;
        let captured = (0..trials)
            .filter(|&seed| {
                let sig = MinHasher::with_seed(1000, r * b, seed as u64)
                    .unwrap()
                    .signature_matrix(&binary)
                    .unwrap();
                LshIndex::new(r, b).candidate_pairs(&sig).pairs.contains(&(0, 1))
            })
            .count();

        let empirical = captured as f64 / trials as f64;
        let expected = candidate_probability(0.5, r, b);
        assert!(
            (empirical - expected).abs() < 0.08,
            "empirical {empirical} vs expected {expected}"
        );
    }
}
