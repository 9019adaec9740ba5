//! Error types for catalog-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression error
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Matrix shape does not match its data or another operand.
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Expected shape or length.
        expected: String,
        /// Actual shape or length.
        got: String,
    },

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),
}
