//! Chunk repository.

use crate::error::StoreResult;
use crate::models::FileInfo;
use async_trait::async_trait;
use rowgrid_core::{Chunk, FileKey};

/// Row-level operations on the chunk table.
///
/// Implementations never split or join payloads; that is the job of
/// [`crate::ChunkStore`].
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Replace all chunks of a file in one transaction.
    ///
    /// Existing rows for `file_key` are deleted and `chunks` inserted. If
    /// any statement fails the transaction rolls back and the old chunks
    /// remain readable. Bumps the file's generation.
    async fn replace_chunks(&self, file_key: &FileKey, chunks: &[Chunk]) -> StoreResult<()>;

    /// Insert chunks after the current last sequence in one transaction.
    ///
    /// The sequence numbers in `chunks` are relative (starting at 0) and are
    /// shifted so the run stays contiguous. Bumps the file's generation and
    /// returns the first sequence used.
    async fn append_chunks(&self, file_key: &FileKey, chunks: &[Chunk]) -> StoreResult<u32>;

    /// Fetch every chunk of a file, ordered by sequence.
    async fn fetch_chunks(&self, file_key: &FileKey) -> StoreResult<Vec<Chunk>>;

    /// Fetch chunks with `first <= sequence <= last`, ordered by sequence.
    async fn fetch_chunk_range(
        &self,
        file_key: &FileKey,
        first: u32,
        last: u32,
    ) -> StoreResult<Vec<Chunk>>;

    /// Count the chunks of a file.
    async fn count_chunks(&self, file_key: &FileKey) -> StoreResult<u32>;

    /// Size and chunk count, or `None` if the file has no chunks.
    async fn file_info(&self, file_key: &FileKey) -> StoreResult<Option<FileInfo>>;

    /// Delete all chunks of a file. Returns the number of rows removed.
    ///
    /// The generation is bumped, not reset, so a recreated file never
    /// reuses an earlier value.
    async fn delete_chunks(&self, file_key: &FileKey) -> StoreResult<u64>;

    /// Counter bumped by every committed change to a file's chunks; 0 for a
    /// key that was never written.
    ///
    /// Reads spanning several queries compare it before and after to detect
    /// a rewrite in between.
    async fn file_generation(&self, file_key: &FileKey) -> StoreResult<u64>;

    /// Check whether a file has at least one chunk.
    async fn file_exists(&self, file_key: &FileKey) -> StoreResult<bool>;

    /// Distinct file keys in ascending order, optionally restricted by a SQL
    /// `LIKE` pattern using `\` as escape character.
    async fn list_file_keys(&self, like: Option<&str>) -> StoreResult<Vec<String>>;
}
