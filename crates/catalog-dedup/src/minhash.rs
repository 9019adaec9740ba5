//! MinHash signature generation over boolean feature matrices.
//!
//! Each of the `H` hash functions is an affine map over token row indices,
//! `h(t) = (a·t + b) mod P`, where `P` is the smallest prime not below the
//! token count. An item's signature entry is the minimum hash over the tokens
//! it possesses, so the fraction of agreeing entries between two items
//! estimates their Jaccard similarity.

use crate::{BinaryMatrix, SignatureMatrix};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Seed used when the caller does not supply one.
pub const DEFAULT_SEED: u64 = 42;

/// Errors from signature generation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MinHashError {
    /// At least one hash function is required.
    #[error("hash count must be at least 1")]
    ZeroHashes,

    /// The hash family was drawn for a different token universe.
    #[error("hash family built for {expected} tokens, matrix has {got}")]
    TokenCountMismatch {
        /// Token count the family was built for.
        expected: usize,
        /// Token rows in the supplied matrix.
        got: usize,
    },
}

/// Hash count used by the batch tools: half the token count, at least one.
#[must_use]
pub fn num_hashes_for_tokens(num_tokens: usize) -> usize {
    (num_tokens / 2).max(1)
}

/// Smallest prime `>= n` (2 for `n <= 2`).
#[must_use]
pub fn next_prime(n: u64) -> u64 {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3u64;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// One affine hash function `(a·t + b) mod P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffineHash {
    /// Multiplier, drawn from `[1, P)`.
    pub a: u64,
    /// Offset, drawn from `[0, P)`.
    pub b: u64,
}

impl AffineHash {
    /// Hash a token row index modulo `prime`.
    #[inline]
    #[must_use]
    pub fn apply(&self, token: u64, prime: u64) -> u64 {
        ((u128::from(self.a) * u128::from(token) + u128::from(self.b)) % u128::from(prime)) as u64
    }
}

/// MinHash signature generator for a fixed token universe.
///
/// The hash family is drawn once at construction from a seeded `StdRng`, so
/// two hashers built with the same `(num_tokens, num_hashes, seed)` produce
/// bit-identical signatures.
#[derive(Debug, Clone)]
pub struct MinHasher {
    num_tokens: usize,
    prime: u64,
    functions: Vec<AffineHash>,
}

impl MinHasher {
    /// Create a hasher with the default seed.
    pub fn new(num_tokens: usize, num_hashes: usize) -> Result<Self, MinHashError> {
        Self::with_seed(num_tokens, num_hashes, DEFAULT_SEED)
    }

    /// Create a hasher whose coefficients come from `seed`.
    pub fn with_seed(num_tokens: usize, num_hashes: usize, seed: u64) -> Result<Self, MinHashError> {
        if num_hashes == 0 {
            return Err(MinHashError::ZeroHashes);
        }

        let prime = next_prime(num_tokens as u64);
        let mut rng = StdRng::seed_from_u64(seed);
        let functions = (0..num_hashes)
            .map(|_| AffineHash {
                a: rng.gen_range(1..prime),
                b: rng.gen_range(0..prime),
            })
            .collect();

        Ok(Self {
            num_tokens,
            prime,
            functions,
        })
    }

    /// Number of hash functions (signature rows).
    #[must_use]
    pub fn num_hashes(&self) -> usize {
        self.functions.len()
    }

    /// Token universe size this hasher was built for.
    #[must_use]
    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    /// Prime modulus of the hash family.
    #[must_use]
    pub fn prime(&self) -> u64 {
        self.prime
    }

    /// The drawn hash functions.
    #[must_use]
    pub fn functions(&self) -> &[AffineHash] {
        &self.functions
    }

    /// Hash values of one token row under every function.
    #[must_use]
    pub fn hash_token(&self, token: usize) -> Vec<u64> {
        self.functions
            .iter()
            .map(|f| f.apply(token as u64, self.prime))
            .collect()
    }

    /// Compute the `(num_hashes × items)` signature matrix.
    ///
    /// Columns without any present token keep `u64::MAX` in every row.
    pub fn signature_matrix(&self, binary: &BinaryMatrix) -> Result<SignatureMatrix, MinHashError> {
        if binary.rows() != self.num_tokens {
            return Err(MinHashError::TokenCountMismatch {
                expected: self.num_tokens,
                got: binary.rows(),
            });
        }

        let num_items = binary.cols();
        let mut signatures = SignatureMatrix::filled(self.num_hashes(), num_items, u64::MAX);

        for token in 0..binary.rows() {
            let present: Vec<usize> = binary
                .row(token)
                .iter()
                .enumerate()
                .filter_map(|(col, &bit)| bit.then_some(col))
                .collect();
            if present.is_empty() {
                continue;
            }

            let hashes = self.hash_token(token);
            for (i, &h) in hashes.iter().enumerate() {
                let row = signatures.row_mut(i);
                for &col in &present {
                    if h < row[col] {
                        row[col] = h;
                    }
                }
            }
        }

        Ok(signatures)
    }

    /// Fraction of signature rows on which two items agree.
    ///
    /// Returns 0.0 for out-of-range columns or an empty signature.
    #[must_use]
    pub fn estimated_similarity(signatures: &SignatureMatrix, i: usize, j: usize) -> f64 {
        if signatures.rows() == 0 || i >= signatures.cols() || j >= signatures.cols() {
            return 0.0;
        }
        let matches = (0..signatures.rows())
            .filter(|&r| signatures[(r, i)] == signatures[(r, j)])
            .count();
        matches as f64 / signatures.rows() as f64
    }
}

/// Generate signatures with the batch-tool defaults: `num_hashes_for_tokens`
/// hash functions drawn from `seed`.
pub fn generate_signature_matrix(binary: &BinaryMatrix, seed: u64) -> Result<SignatureMatrix, MinHashError> {
    let hasher = MinHasher::with_seed(binary.rows(), num_hashes_for_tokens(binary.rows()), seed)?;
    hasher.signature_matrix(binary)
}
