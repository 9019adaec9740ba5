//! Exact Jaccard dissimilarity for candidate pairs.
//!
//! LSH only prunes the comparison space; the distances fed to clustering are
//! recomputed from the boolean matrix for every surviving pair.

use crate::{BinaryMatrix, DistanceMap, ItemPair};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors from distance estimation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimilarityError {
    /// A candidate pair references a column outside the matrix.
    #[error("item {item} out of range for matrix with {num_items} items")]
    ItemOutOfRange {
        /// Offending item index.
        item: usize,
        /// Number of item columns.
        num_items: usize,
    },
}

/// Jaccard dissimilarity `1 - |A ∩ B| / |A ∪ B|` of two item columns.
///
/// Two all-zero columns have an empty union and get the maximum
/// dissimilarity, 1.0.
pub fn jaccard_distance(binary: &BinaryMatrix, i: usize, j: usize) -> Result<f64, SimilarityError> {
    for item in [i, j] {
        if item >= binary.cols() {
            return Err(SimilarityError::ItemOutOfRange {
                item,
                num_items: binary.cols(),
            });
        }
    }

    let mut intersection = 0usize;
    let mut union = 0usize;
    for token in 0..binary.rows() {
        let row = binary.row(token);
        let (a, b) = (row[i], row[j]);
        intersection += usize::from(a && b);
        union += usize::from(a || b);
    }

    if union == 0 {
        Ok(1.0)
    } else {
        Ok(1.0 - intersection as f64 / union as f64)
    }
}

/// Dissimilarity for every candidate pair.
///
/// An empty candidate set returns an empty map.
pub fn jaccard_distances(
    binary: &BinaryMatrix,
    candidates: &BTreeSet<ItemPair>,
) -> Result<DistanceMap, SimilarityError> {
    candidates
        .iter()
        .map(|&(i, j)| Ok(((i, j), jaccard_distance(binary, i, j)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::binary_from_columns;

    #[test]
    fn test_known_intersection_and_union() {
        // |A ∩ B| = 2, |A ∪ B| = 5
        let binary = binary_from_columns(8, &[&[0, 1, 2, 3], &[2, 3, 6]]);
        let d = jaccard_distance(&binary, 0, 1).unwrap();
        assert_eq!(d, 1.0 - 2.0 / 5.0);
    }

    #[test]
    fn test_identical_and_disjoint() {
        let binary = binary_from_columns(6, &[&[0, 1], &[0, 1], &[4, 5]]);
        assert_eq!(jaccard_distance(&binary, 0, 1).unwrap(), 0.0);
        assert_eq!(jaccard_distance(&binary, 0, 2).unwrap(), 1.0);
    }

    #[test]
    fn test_empty_union_is_max_dissimilarity() {
        let binary = binary_from_columns(4, &[&[], &[]]);
        assert_eq!(jaccard_distance(&binary, 0, 1).unwrap(), 1.0);
    }

    #[test]
    fn test_empty_candidates() {
        let binary = binary_from_columns(4, &[&[1], &[1]]);
        let distances = jaccard_distances(&binary, &BTreeSet::new()).unwrap();
        assert!(distances.is_empty());
    }

    #[test]
    fn test_distances_keyed_by_pair() {
        let binary = binary_from_columns(4, &[&[0, 1], &[0, 1], &[1, 2]]);
        let candidates = BTreeSet::from([(0, 1), (1, 2)]);
        let distances = jaccard_distances(&binary, &candidates).unwrap();

        assert_eq!(distances.len(), 2);
        assert_eq!(distances[&(0, 1)], 0.0);
        assert!((distances[&(1, 2)] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_pair() {
        let binary = binary_from_columns(4, &[&[0], &[1]]);
        let candidates = BTreeSet::from([(0, 5)]);
        assert_eq!(
            jaccard_distances(&binary, &candidates).unwrap_err(),
            SimilarityError::ItemOutOfRange {
                item: 5,
                num_items: 2
            }
        );
    }
}
