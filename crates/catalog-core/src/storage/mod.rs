//! Storage backend abstraction.
//!
//! Persisted matrices are addressed by string keys. Only the local
//! filesystem backend is provided.

mod local;

pub use local::LocalStorage;

use crate::error::Result;

/// Trait for storage backends.
pub trait StorageBackend: Send + Sync {
    /// Get data by key.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Put data at key.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Delete data at key.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check if key exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// List keys with given prefix, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
