//! Files as runs of chunk rows.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use rowgrid_core::codec::join_sequenced;
use rowgrid_core::{Chunk, ChunkCodec, FileKey, FilesConfig, KeyPattern};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use crate::error::{StoreError, StoreResult};
use crate::models::FileInfo;
use crate::store::TableStore;

/// Parallel reads retried after the file changed underneath them.
pub const MAX_READ_ATTEMPTS: usize = 3;

/// Stream of chunks in sequence order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StoreResult<Chunk>> + Send>>;

/// Reads and writes whole files against a [`TableStore`].
///
/// Writes split the payload with the configured [`ChunkCodec`] and replace
/// the file's rows in one transaction. Reads fetch rows and reassemble them
/// in sequence order, optionally fetching disjoint ranges concurrently.
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn TableStore>,
    codec: ChunkCodec,
    read_concurrency: usize,
    parallel_read_threshold: u32,
    read_batch_size: u32,
}

impl ChunkStore {
    /// Create a chunk store over `backend` with the given tuning.
    pub fn new(backend: Arc<dyn TableStore>, config: &FilesConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            codec: ChunkCodec::new(config.chunk_size)?,
            read_concurrency: config.read_concurrency,
            parallel_read_threshold: config.parallel_read_threshold,
            read_batch_size: config.read_batch_size,
        })
    }

    /// The underlying table store.
    pub fn backend(&self) -> &Arc<dyn TableStore> {
        &self.backend
    }

    /// The codec used to split payloads.
    pub fn codec(&self) -> &ChunkCodec {
        &self.codec
    }

    /// Replace the content of `file_key` with `payload`.
    ///
    /// The old chunks stay readable until the new ones are committed.
    pub async fn write(&self, file_key: &FileKey, payload: impl Into<Bytes>) -> StoreResult<()> {
        let payload = payload.into();
        let chunks = self.codec.split(&payload);
        self.backend.replace_chunks(file_key, &chunks).await?;

        tracing::debug!(
            file_key = %file_key,
            size = payload.len(),
            chunks = chunks.len(),
            "Wrote file"
        );
        Ok(())
    }

    /// Append `payload` after the last chunk of `file_key`, creating the file
    /// if it does not exist.
    pub async fn append(&self, file_key: &FileKey, payload: impl Into<Bytes>) -> StoreResult<()> {
        let payload = payload.into();
        let chunks = self.codec.split(&payload);
        let first = self.backend.append_chunks(file_key, &chunks).await?;

        tracing::debug!(
            file_key = %file_key,
            size = payload.len(),
            first_sequence = first,
            "Appended to file"
        );
        Ok(())
    }

    /// Read a whole file with a single query.
    pub async fn read(&self, file_key: &FileKey) -> StoreResult<Bytes> {
        let chunks = self.backend.fetch_chunks(file_key).await?;
        if chunks.is_empty() {
            return Err(StoreError::NotFound(file_key.to_string()));
        }
        Ok(join_sequenced(chunks, 0)?)
    }

    /// Read a file using the configured read concurrency.
    pub async fn fetch(&self, file_key: &FileKey) -> StoreResult<Bytes> {
        self.read_parallel(file_key, self.read_concurrency).await
    }

    /// Read a file by fetching batches of chunks on up to `concurrency`
    /// tasks at once.
    ///
    /// Small files and `concurrency <= 1` fall back to [`read`](Self::read).
    /// The result is byte-identical to `read`. If any batch fails, the other
    /// tasks are aborted and the read fails as a whole.
    ///
    /// The batches are separate queries, so the file's generation is compared
    /// before and after them. A file rewritten in between is read again, up
    /// to [`MAX_READ_ATTEMPTS`] times, then the read fails with
    /// [`StoreError::Conflict`].
    pub async fn read_parallel(
        &self,
        file_key: &FileKey,
        concurrency: usize,
    ) -> StoreResult<Bytes> {
        for attempt in 1..=MAX_READ_ATTEMPTS {
            let generation = self.backend.file_generation(file_key).await?;
            let count = self.backend.count_chunks(file_key).await?;
            if count == 0 {
                return Err(StoreError::NotFound(file_key.to_string()));
            }
            if concurrency <= 1 || count < self.parallel_read_threshold {
                return self.read(file_key).await;
            }

            let fetched = self.fetch_batches(file_key, concurrency, count).await;
            if self.backend.file_generation(file_key).await? == generation {
                let chunks = fetched?;
                tracing::debug!(file_key = %file_key, chunks = count, "Read file in parallel");
                return Ok(join_sequenced(chunks, 0)?);
            }
            tracing::warn!(
                file_key = %file_key,
                attempt,
                "File changed during parallel read, retrying"
            );
        }
        Err(StoreError::Conflict(format!(
            "{file_key} changed during {MAX_READ_ATTEMPTS} parallel read attempts"
        )))
    }

    async fn fetch_batches(
        &self,
        file_key: &FileKey,
        concurrency: usize,
        count: u32,
    ) -> StoreResult<Vec<Chunk>> {
        let batch = self.read_batch_size;
        let batches = count.div_ceil(batch) as usize;
        let semaphore = Arc::new(Semaphore::new(concurrency.min(batches)));
        let mut guard = AbortOnDrop(Vec::with_capacity(batches));
        let mut workers = FuturesUnordered::new();

        for first in (0..count).step_by(batch as usize) {
            let last = first.saturating_add(batch - 1).min(count - 1);
            let backend = Arc::clone(&self.backend);
            let key = file_key.clone();
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StoreError::Internal(e.to_string()))?;
                let chunks = backend.fetch_chunk_range(&key, first, last).await?;
                let expected = (last - first + 1) as usize;
                if chunks.len() != expected {
                    return Err(StoreError::Integrity(format!(
                        "{key}: expected {expected} chunks in {first}..={last}, found {}",
                        chunks.len()
                    )));
                }
                Ok(chunks)
            });
            guard.0.push(handle.abort_handle());
            workers.push(async move { (first, last, handle.await) });
        }

        let mut chunks = Vec::with_capacity(count as usize);
        while let Some((first, last, joined)) = workers.next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(StoreError::Internal(format!("read task failed: {e}")))
            });
            match result {
                Ok(batch) => chunks.extend(batch),
                Err(source) => {
                    tracing::warn!(
                        file_key = %file_key,
                        first,
                        last,
                        error = %source,
                        "Parallel read failed, aborting remaining batches"
                    );
                    return Err(StoreError::Worker {
                        first,
                        last,
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(chunks)
    }

    /// Fetch chunks `first..=last` of a file.
    pub async fn read_range(
        &self,
        file_key: &FileKey,
        first: u32,
        last: u32,
    ) -> StoreResult<Vec<Chunk>> {
        if first > last {
            return Err(StoreError::Validation(format!(
                "invalid chunk range {first}..={last}"
            )));
        }
        self.backend.fetch_chunk_range(file_key, first, last).await
    }

    /// Stream a file's chunks in order, one batch query at a time.
    ///
    /// Each batch is yielded only if the file's generation is unchanged since
    /// the stream started; a rewrite mid-stream ends it with
    /// [`StoreError::Conflict`] rather than mixing old and new chunks.
    pub fn read_chunks(&self, file_key: &FileKey) -> ChunkStream {
        let backend = Arc::clone(&self.backend);
        let key = file_key.clone();
        let batch = self.read_batch_size;

        Box::pin(async_stream::try_stream! {
            let generation = backend.file_generation(&key).await?;
            let count = backend.count_chunks(&key).await?;
            if count == 0 {
                Err::<(), _>(StoreError::NotFound(key.to_string()))?;
            }
            let mut expected = 0u32;
            while expected < count {
                let last = expected.saturating_add(batch - 1).min(count - 1);
                let chunks = backend.fetch_chunk_range(&key, expected, last).await?;
                if backend.file_generation(&key).await? != generation {
                    Err::<(), _>(StoreError::Conflict(format!(
                        "{key} changed while streaming chunk {expected}"
                    )))?;
                }
                if chunks.is_empty() {
                    Err::<(), _>(StoreError::Integrity(format!(
                        "{key}: chunks from {expected} vanished"
                    )))?;
                }
                for chunk in chunks {
                    if chunk.sequence != expected {
                        Err::<(), _>(StoreError::Integrity(format!(
                            "{key}: expected chunk {expected}, found {}",
                            chunk.sequence
                        )))?;
                    }
                    expected += 1;
                    yield chunk;
                }
            }
        })
    }

    /// Remove a file. Returns whether anything was deleted.
    pub async fn delete(&self, file_key: &FileKey) -> StoreResult<bool> {
        let removed = self.backend.delete_chunks(file_key).await?;
        tracing::debug!(file_key = %file_key, chunks = removed, "Deleted file");
        Ok(removed > 0)
    }

    /// Check whether a file exists.
    pub async fn exists(&self, file_key: &FileKey) -> StoreResult<bool> {
        self.backend.file_exists(file_key).await
    }

    /// Size and chunk count of a file, if it exists.
    pub async fn stat(&self, file_key: &FileKey) -> StoreResult<Option<FileInfo>> {
        self.backend.file_info(file_key).await
    }

    /// Stored file keys in ascending order, filtered by `pattern` if given.
    pub async fn list_keys(&self, pattern: Option<&KeyPattern>) -> StoreResult<Vec<String>> {
        let like = pattern.and_then(KeyPattern::like_prefix);
        let mut keys = self.backend.list_file_keys(like.as_deref()).await?;
        if let Some(pattern) = pattern {
            keys.retain(|k| pattern.matches(k));
        }
        // Database collations differ; byte order is the contract
        keys.sort_unstable();
        Ok(keys)
    }
}

/// Aborts the read tasks when the read returns early or is cancelled.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}
