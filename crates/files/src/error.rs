//! Error types for the file API.

use rowgrid_store::StoreError;
use thiserror::Error;

/// File API errors, collapsed to what callers act on.
#[derive(Debug, Error)]
pub enum FilesError {
    /// The file, record or alias does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The database failed or holds inconsistent data.
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    /// The caller passed a bad key, pattern, mode or value.
    #[error("validation error: {0}")]
    Validation(String),
}

impl FilesError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<StoreError> for FilesError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Validation(msg) | StoreError::Config(msg) => Self::Validation(msg),
            other => Self::Storage(other),
        }
    }
}

impl From<rowgrid_core::Error> for FilesError {
    fn from(err: rowgrid_core::Error) -> Self {
        StoreError::from(err).into()
    }
}

/// Result type for file API operations.
pub type FilesResult<T> = std::result::Result<T, FilesError>;
