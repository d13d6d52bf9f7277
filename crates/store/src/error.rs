//! Store error types.

use thiserror::Error;

/// Chunk and record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored chunks are inconsistent (gaps, vanished ranges).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The file was rewritten while a multi-query read was in progress.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// A parallel read worker failed; the read was abandoned.
    #[error("read of chunks {first}..={last} failed: {source}")]
    Worker {
        first: u32,
        last: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the error reports a missing file or record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the caller passed bad input or configuration.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

impl From<rowgrid_core::Error> for StoreError {
    fn from(err: rowgrid_core::Error) -> Self {
        if err.is_integrity() {
            return Self::Integrity(err.to_string());
        }
        match err {
            rowgrid_core::Error::Config(msg) => Self::Config(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
