//! Database models mapping to the chunk table.

use rowgrid_core::{Chunk, FileKey};
use sqlx::FromRow;

use crate::error::{StoreError, StoreResult};

/// One row of the chunk table.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub file_key: String,
    pub sequence: i64,
    pub payload: Vec<u8>,
}

impl ChunkRow {
    /// Convert into a domain chunk, rejecting out-of-range sequences.
    pub fn into_chunk(self) -> StoreResult<Chunk> {
        let sequence = u32::try_from(self.sequence).map_err(|_| {
            StoreError::Integrity(format!(
                "chunk of {} has invalid sequence {}",
                self.file_key, self.sequence
            ))
        })?;
        Ok(Chunk::new(sequence, self.payload))
    }
}

/// Size and chunk count of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_key: FileKey,
    /// Total payload bytes.
    pub size: u64,
    /// Number of chunk rows.
    pub chunks: u32,
}

/// Convert a list of rows into domain chunks.
pub(crate) fn rows_into_chunks(rows: Vec<ChunkRow>) -> StoreResult<Vec<Chunk>> {
    rows.into_iter().map(ChunkRow::into_chunk).collect()
}

/// Convert a count or sum returned by the database.
pub(crate) fn non_negative<T: TryFrom<i64>>(what: &str, value: i64) -> StoreResult<T> {
    T::try_from(value).map_err(|_| StoreError::Integrity(format!("{what} out of range: {value}")))
}
