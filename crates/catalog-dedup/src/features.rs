//! Token sets to a boolean feature matrix.

use crate::BinaryMatrix;
use std::collections::{BTreeMap, BTreeSet};

/// Feature matrix with the vocabulary its rows stand for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMatrix {
    /// Token of each row, ascending.
    pub vocabulary: Vec<String>,
    /// `vocabulary.len() × items` presence matrix.
    pub matrix: BinaryMatrix,
}

impl FeatureMatrix {
    /// Row of `token`, if it is in the vocabulary.
    #[must_use]
    pub fn token_row(&self, token: &str) -> Option<usize> {
        self.vocabulary
            .binary_search_by(|t| t.as_str().cmp(token))
            .ok()
    }
}

/// Builds a [`FeatureMatrix`] from per-item token lists.
///
/// Row order is the sorted vocabulary and column order is the input order, so
/// the same items always give the same matrix.
#[derive(Debug, Clone)]
pub struct FeatureMatrixBuilder {
    lowercase: bool,
    min_item_frequency: usize,
}

impl Default for FeatureMatrixBuilder {
    fn default() -> Self {
        Self {
            lowercase: true,
            min_item_frequency: 1,
        }
    }
}

impl FeatureMatrixBuilder {
    /// Builder with lowercasing on and no frequency cut.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercase tokens before building the vocabulary.
    #[must_use]
    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    /// Drop tokens held by fewer than `min` items.
    #[must_use]
    pub fn with_min_item_frequency(mut self, min: usize) -> Self {
        self.min_item_frequency = min.max(1);
        self
    }

    fn normalize(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if token.is_empty() {
            None
        } else if self.lowercase {
            Some(token.to_lowercase())
        } else {
            Some(token.to_string())
        }
    }

    /// Build the matrix. Empty tokens are ignored; repeated tokens within an
    /// item count once.
    pub fn build<S: AsRef<str>>(&self, items: &[Vec<S>]) -> FeatureMatrix {
        let item_tokens: Vec<BTreeSet<String>> = items
            .iter()
            .map(|tokens| tokens.iter().filter_map(|t| self.normalize(t.as_ref())).collect())
            .collect();

        let mut frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in &item_tokens {
            for token in tokens {
                *frequency.entry(token.as_str()).or_default() += 1;
            }
        }

        let vocabulary: Vec<String> = frequency
            .into_iter()
            .filter(|&(_, count)| count >= self.min_item_frequency)
            .map(|(token, _)| token.to_string())
            .collect();

        let mut matrix = BinaryMatrix::filled(vocabulary.len(), items.len(), false);
        for (col, tokens) in item_tokens.iter().enumerate() {
            for token in tokens {
                if let Ok(row) = vocabulary.binary_search(token) {
                    matrix[(row, col)] = true;
                }
            }
        }

        FeatureMatrix { vocabulary, matrix }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sorted_vocabulary() {
        let features = FeatureMatrixBuilder::new().build(&[vec!["b", "a"], vec!["c", "A", ""]]);

        assert_eq!(features.vocabulary, vec!["a", "b", "c"]);
        assert_eq!(features.matrix.shape(), (3, 2));
        assert_eq!(features.matrix.column_vec(0), vec![true, true, false]);
        assert_eq!(features.matrix.column_vec(1), vec![true, false, true]);
        assert_eq!(features.token_row("c"), Some(2));
        assert_eq!(features.token_row("z"), None);
    }

    #[test]
    fn test_case_sensitive() {
        let features = FeatureMatrixBuilder::new()
            .with_lowercase(false)
            .build(&[vec!["A", "a"]]);
        assert_eq!(features.vocabulary, vec!["A", "a"]);
    }

    #[test]
    fn test_min_item_frequency() {
        let items = vec![
            vec!["4k".to_string(), "sony".to_string()],
            vec!["4k".to_string(), "lg".to_string()],
        ];
        let features = FeatureMatrixBuilder::new().with_min_item_frequency(2).build(&items);
        assert_eq!(features.vocabulary, vec!["4k"]);
        assert_eq!(features.matrix.row(0), &[true, true]);
    }

    #[test]
    fn test_no_items() {
        let features = FeatureMatrixBuilder::new().build::<&str>(&[]);
        assert!(features.vocabulary.is_empty());
        assert_eq!(features.matrix.shape(), (0, 0));
    }
}
