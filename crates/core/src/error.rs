//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid chunk size: {size} (must be between {min} and {max})")]
    InvalidChunkSize { size: usize, min: usize, max: usize },

    #[error("invalid file key: {0}")]
    InvalidKey(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid value for column {column}: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("chunk sequence gap: expected {expected}, got {actual}")]
    SequenceGap { expected: u32, actual: u32 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means stored chunks are inconsistent, as opposed
    /// to the caller passing bad input.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::SequenceGap { .. })
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
