//! Hashing functions.
//!
//! Two families are used by the pipeline:
//! - xxh3 for seed derivation and payload checksums (fast, not collision resistant)
//! - blake3 for LSH bucket keys, where distinct band tuples must not collide

/// A 32-byte cryptographic digest.
pub type Digest = [u8; 32];

/// Blake3 digest of a slice of u64 values, encoded little-endian.
///
/// Used as the bucket key for one item's band slice.
#[must_use]
pub fn band_digest(values: &[u64]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    for v in values {
        hasher.update(&v.to_le_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// xxh3-64 checksum of a payload.
#[inline]
#[must_use]
pub fn checksum(data: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(data)
}

/// Hash with seed.
#[inline]
#[must_use]
pub fn hash_with_seed(data: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(data, seed)
}

/// Derive a child seed from a base seed and a sequence of integer parts.
///
/// The same `(seed, parts)` always yields the same child, regardless of the
/// order in which callers derive them.
#[must_use]
pub fn derive_seed(seed: u64, parts: &[u64]) -> u64 {
    let bytes: Vec<u8> = parts.iter().flat_map(|p| p.to_le_bytes()).collect();
    hash_with_seed(&bytes, seed)
}
