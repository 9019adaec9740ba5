//! Quality metrics against known duplicate pairs.
//!
//! Candidate generation is scored with pair quality (precision), pair
//! completeness (recall) and their harmonic mean F1*. Clustering is scored on
//! the pairs implied by the clusters.

use crate::{canonical_pair, ItemId, ItemPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Known duplicate pairs. Never consulted by the detection chain itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruth {
    pairs: BTreeSet<ItemPair>,
}

impl GroundTruth {
    /// Build from arbitrary pairs; pairs are canonicalised and self-pairs dropped.
    pub fn from_pairs(pairs: impl IntoIterator<Item = ItemPair>) -> Self {
        Self {
            pairs: pairs
                .into_iter()
                .filter(|&(i, j)| i != j)
                .map(|(i, j)| canonical_pair(i, j))
                .collect(),
        }
    }

    /// Every pair of items sharing an identifier. Item `k` has identifier
    /// `ids[k]`; items with an empty identifier have no duplicates.
    pub fn from_identifiers<S: AsRef<str>>(ids: &[S]) -> Self {
        let mut groups: HashMap<&str, Vec<ItemId>> = HashMap::new();
        for (item, id) in ids.iter().enumerate() {
            let id = id.as_ref();
            if !id.is_empty() {
                groups.entry(id).or_default().push(item);
            }
        }

        let mut pairs = BTreeSet::new();
        for members in groups.values() {
            for (k, &i) in members.iter().enumerate() {
                for &j in &members[k + 1..] {
                    pairs.insert(canonical_pair(i, j));
                }
            }
        }
        Self { pairs }
    }

    /// Pairs, canonical and ascending.
    #[must_use]
    pub fn pairs(&self) -> &BTreeSet<ItemPair> {
        &self.pairs
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when there are no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// True when `(i, j)` is a known duplicate, in either order.
    #[must_use]
    pub fn contains(&self, i: ItemId, j: ItemId) -> bool {
        self.pairs.contains(&canonical_pair(i, j))
    }

    /// Pairs with both endpoints in `items`.
    #[must_use]
    pub fn restrict(&self, items: &BTreeSet<ItemId>) -> Self {
        Self {
            pairs: self
                .pairs
                .iter()
                .copied()
                .filter(|(i, j)| items.contains(i) && items.contains(j))
                .collect(),
        }
    }

    /// Split into the pairs inside `train` and the pairs inside `test`.
    /// Pairs straddling the two sets belong to neither.
    #[must_use]
    pub fn partition(&self, train: &BTreeSet<ItemId>, test: &BTreeSet<ItemId>) -> (Self, Self) {
        (self.restrict(train), self.restrict(test))
    }

    /// Re-index to a block whose local item `k` is global item `members[k]`.
    ///
    /// Pairs with an endpoint outside the block are dropped.
    #[must_use]
    pub fn for_block(&self, members: &[ItemId]) -> Self {
        let mut local: HashMap<ItemId, ItemId> = HashMap::with_capacity(members.len());
        for (k, &global) in members.iter().enumerate() {
            local.entry(global).or_insert(k);
        }
        Self::from_pairs(
            self.pairs
                .iter()
                .filter_map(|(i, j)| Some((*local.get(i)?, *local.get(j)?))),
        )
    }
}

impl FromIterator<ItemPair> for GroundTruth {
    fn from_iter<I: IntoIterator<Item = ItemPair>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a + b > 0.0 {
        2.0 * a * b / (a + b)
    } else {
        0.0
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Scores for one candidate set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetrics {
    /// True-positive candidates over all candidates.
    pub pair_quality: f64,
    /// True-positive candidates over all ground-truth pairs.
    pub pair_completeness: f64,
    /// Harmonic mean of the two above.
    pub f1_star: f64,
    /// Candidates over `N(N-1)/2`.
    pub fraction_of_comparisons: f64,
}

/// Score `candidates` against `truth`; `total_items` is the `N` of the
/// comparison fraction.
#[must_use]
pub fn evaluate_candidates(
    candidates: &BTreeSet<ItemPair>,
    truth: &GroundTruth,
    total_items: usize,
) -> CandidateMetrics {
    let true_positives = candidates.intersection(truth.pairs()).count();
    let pair_quality = ratio(true_positives, candidates.len());
    let pair_completeness = ratio(true_positives, truth.len());
    CandidateMetrics {
        pair_quality,
        pair_completeness,
        f1_star: harmonic_mean(pair_quality, pair_completeness),
        fraction_of_comparisons: crate::pipeline::fraction_of_comparisons(
            candidates.len(),
            total_items,
        ),
    }
}

/// Scores for the pairs implied by a clustering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    /// Correct predicted pairs over predicted pairs.
    pub precision: f64,
    /// Correct predicted pairs over ground-truth pairs.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
}

/// Score predicted within-cluster pairs against `truth`.
#[must_use]
pub fn evaluate_clusters(predicted: &BTreeSet<ItemPair>, truth: &GroundTruth) -> ClusterMetrics {
    let true_positives = predicted.intersection(truth.pairs()).count();
    let precision = ratio(true_positives, predicted.len());
    let recall = ratio(true_positives, truth.len());
    ClusterMetrics {
        precision,
        recall,
        f1: harmonic_mean(precision, recall),
    }
}

/// Averaged bootstrap result for one `(r, b, threshold)` combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Rows per band.
    pub r: usize,
    /// Number of bands.
    pub b: usize,
    /// Clustering threshold.
    pub threshold: f64,
    /// Mean fraction of comparisons.
    pub fraction_of_comparisons: f64,
    /// Mean pair quality.
    pub avg_pair_quality: f64,
    /// Mean pair completeness.
    pub avg_pair_completeness: f64,
    /// Mean F1*.
    pub avg_f1_star: f64,
    /// Mean clustering F1.
    pub avg_final_f1: f64,
}

/// Record with the highest `avg_f1_star`; the earliest wins ties.
#[must_use]
pub fn select_best<'a>(records: impl IntoIterator<Item = &'a EvaluationRecord>) -> Option<&'a EvaluationRecord> {
    records.into_iter().fold(None, |best, record| match best {
        Some(current) if current.avg_f1_star >= record.avg_f1_star => Some(current),
        _ => Some(record),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(r: usize, f1_star: f64) -> EvaluationRecord {
        EvaluationRecord {
            r,
            b: 1,
            threshold: 0.5,
            fraction_of_comparisons: 0.0,
            avg_pair_quality: 0.0,
            avg_pair_completeness: 0.0,
            avg_f1_star: f1_star,
            avg_final_f1: 0.0,
        }
    }

    #[test]
    fn test_from_identifiers() {
        let truth = GroundTruth::from_identifiers(&["a", "b", "a", "", "a", ""]);
        assert_eq!(
            truth.pairs().iter().copied().collect::<Vec<_>>(),
            vec![(0, 2), (0, 4), (2, 4)]
        );
        assert!(truth.contains(4, 0));
    }

    #[test]
    fn test_from_pairs_canonicalises() {
        let truth: GroundTruth = [(3, 1), (1, 3), (2, 2)].into_iter().collect();
        assert_eq!(truth.len(), 1);
        assert!(truth.contains(1, 3));
    }

    #[test]
    fn test_partition() {
        let truth = GroundTruth::from_pairs([(0, 1), (1, 2), (3, 4)]);
        let train = BTreeSet::from([0, 1, 2]);
        let test = BTreeSet::from([3, 4]);
        let (tr, te) = truth.partition(&train, &test);
        assert_eq!(tr.len(), 2);
        assert_eq!(te.pairs(), &BTreeSet::from([(3, 4)]));

        let (tr, te) = truth.partition(&BTreeSet::from([0, 3]), &BTreeSet::from([1, 4]));
        assert!(tr.is_empty() && te.is_empty());
    }

    #[test]
    fn test_for_block_reindexes() {
        let truth = GroundTruth::from_pairs([(10, 20), (20, 30), (10, 40)]);
        let block = truth.for_block(&[30, 20, 10]);
        // 30 → 0, 20 → 1, 10 → 2; 40 is outside the block.
        assert_eq!(block.pairs(), &BTreeSet::from([(0, 1), (1, 2)]));
    }

    #[test]
    fn test_candidate_metrics() {
        let truth = GroundTruth::from_pairs([(0, 1), (2, 3)]);
        let candidates = BTreeSet::from([(0, 1), (0, 2), (1, 2), (1, 3)]);
        let m = evaluate_candidates(&candidates, &truth, 5);

        assert_eq!(m.pair_quality, 0.25);
        assert_eq!(m.pair_completeness, 0.5);
        assert!((m.f1_star - 2.0 * 0.25 * 0.5 / 0.75).abs() < 1e-12);
        assert_eq!(m.fraction_of_comparisons, 0.4);
    }

    #[test]
    fn test_zero_metrics() {
        let truth = GroundTruth::from_pairs([(0, 1)]);
        let m = evaluate_candidates(&BTreeSet::from([(2, 3)]), &truth, 4);
        assert_eq!(m.f1_star, 0.0);

        let empty = evaluate_candidates(&BTreeSet::new(), &GroundTruth::default(), 0);
        assert_eq!(empty, CandidateMetrics::default());
    }

    #[test]
    fn test_cluster_metrics() {
        let truth = GroundTruth::from_pairs([(0, 1), (0, 2), (1, 2)]);
        let predicted = BTreeSet::from([(0, 1), (3, 4)]);
        let m = evaluate_clusters(&predicted, &truth);
        assert_eq!(m.precision, 0.5);
        assert!((m.recall - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_select_best_first_wins_ties() {
        let records = vec![record(1, 0.3), record(2, 0.8), record(3, 0.8), record(4, 0.1)];
        assert_eq!(select_best(&records).map(|r| r.r), Some(2));
        assert!(select_best(&Vec::<EvaluationRecord>::new()).is_none());
    }

    #[test]
    fn test_record_field_names() {
        let json = serde_json::to_value(record(5, 0.5)).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "avg_f1_star",
                "avg_final_f1",
                "avg_pair_completeness",
                "avg_pair_quality",
                "b",
                "fraction_of_comparisons",
                "r",
                "threshold"
            ]
        );
    }
}
