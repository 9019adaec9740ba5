//! # catalog-core
//!
//! Shared infrastructure for the catalog deduplication tools.
//!
//! Provides:
//! - Dense row-major matrices (`Matrix<T>`) used for feature and signature matrices
//! - Hashing (xxhash for seeds and checksums, blake3 for bucket digests)
//! - Compression (zstd)
//! - Local filesystem storage for persisted matrices

pub mod compression;
pub mod error;
pub mod hashing;
pub mod storage;
pub mod types;

pub use compression::{Compressor, ZstdCompressor};
pub use error::{CoreError, Result};
pub use hashing::{band_digest, checksum, derive_seed, Digest};
pub use storage::{LocalStorage, StorageBackend};
pub use types::Matrix;
