//! Table store wrappers that inject failures and races.

use async_trait::async_trait;
use rowgrid_core::{Chunk, FileKey, ModelSchema, Values};
use rowgrid_store::{ChunkRepo, FileInfo, RecordRepo, StoreError, StoreResult, TableStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Delegate the record and store traits, plus every chunk method except
/// `fetch_chunk_range`, to `self.inner`.
macro_rules! delegate_to_inner {
    ($mock:ty) => {
        #[async_trait]
        impl ChunkRepo for $mock {
            async fn replace_chunks(
                &self,
                file_key: &FileKey,
                chunks: &[Chunk],
            ) -> StoreResult<()> {
                self.inner.replace_chunks(file_key, chunks).await
            }

            async fn append_chunks(
                &self,
                file_key: &FileKey,
                chunks: &[Chunk],
            ) -> StoreResult<u32> {
                self.inner.append_chunks(file_key, chunks).await
            }

            async fn fetch_chunks(&self, file_key: &FileKey) -> StoreResult<Vec<Chunk>> {
                self.inner.fetch_chunks(file_key).await
            }

            async fn fetch_chunk_range(
                &self,
                file_key: &FileKey,
                first: u32,
                last: u32,
            ) -> StoreResult<Vec<Chunk>> {
                self.fetch_range(file_key, first, last).await
            }

            async fn count_chunks(&self, file_key: &FileKey) -> StoreResult<u32> {
                self.inner.count_chunks(file_key).await
            }

            async fn file_info(&self, file_key: &FileKey) -> StoreResult<Option<FileInfo>> {
                self.inner.file_info(file_key).await
            }

            async fn delete_chunks(&self, file_key: &FileKey) -> StoreResult<u64> {
                self.inner.delete_chunks(file_key).await
            }

            async fn file_generation(&self, file_key: &FileKey) -> StoreResult<u64> {
                self.inner.file_generation(file_key).await
            }

            async fn file_exists(&self, file_key: &FileKey) -> StoreResult<bool> {
                self.inner.file_exists(file_key).await
            }

            async fn list_file_keys(&self, like: Option<&str>) -> StoreResult<Vec<String>> {
                self.inner.list_file_keys(like).await
            }
        }

        #[async_trait]
        impl RecordRepo for $mock {
            async fn create_table(&self, schema: &ModelSchema) -> StoreResult<()> {
                self.inner.create_table(schema).await
            }

            async fn drop_table(&self, schema: &ModelSchema) -> StoreResult<()> {
                self.inner.drop_table(schema).await
            }

            async fn insert_record(
                &self,
                schema: &ModelSchema,
                values: &Values,
            ) -> StoreResult<i64> {
                self.inner.insert_record(schema, values).await
            }

            async fn update_record(
                &self,
                schema: &ModelSchema,
                pk: i64,
                values: &Values,
            ) -> StoreResult<()> {
                self.inner.update_record(schema, pk, values).await
            }

            async fn fetch_record(
                &self,
                schema: &ModelSchema,
                pk: i64,
            ) -> StoreResult<Option<Values>> {
                self.inner.fetch_record(schema, pk).await
            }

            async fn fetch_records(&self, schema: &ModelSchema) -> StoreResult<Vec<(i64, Values)>> {
                self.inner.fetch_records(schema).await
            }

            async fn delete_record(
                &self,
                schema: &ModelSchema,
                pk: i64,
                file_keys: &[FileKey],
            ) -> StoreResult<bool> {
                self.inner.delete_record(schema, pk, file_keys).await
            }

            async fn count_records(&self, schema: &ModelSchema) -> StoreResult<u64> {
                self.inner.count_records(schema).await
            }
        }

        #[async_trait]
        impl TableStore for $mock {
            async fn migrate(&self) -> StoreResult<()> {
                self.inner.migrate().await
            }

            async fn health_check(&self) -> StoreResult<()> {
                self.inner.health_check().await
            }

            fn backend_name(&self) -> &'static str {
                self.inner.backend_name()
            }
        }
    };
}

/// Range fetches starting at or after `fail_from` return an error. Other
/// range fetches are delayed by `delay` so the failure lands while they are
/// still in flight.
#[allow(dead_code)]
pub struct FailingRangeStore {
    inner: Arc<dyn TableStore>,
    fail_from: u32,
    delay: Duration,
    pub completed_ranges: AtomicUsize,
}

#[allow(dead_code)]
impl FailingRangeStore {
    pub fn new(inner: Arc<dyn TableStore>, fail_from: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_from,
            delay,
            completed_ranges: AtomicUsize::new(0),
        })
    }

    async fn fetch_range(
        &self,
        file_key: &FileKey,
        first: u32,
        last: u32,
    ) -> StoreResult<Vec<Chunk>> {
        if first >= self.fail_from {
            return Err(StoreError::Internal("injected range failure".to_string()));
        }
        tokio::time::sleep(self.delay).await;
        let chunks = self.inner.fetch_chunk_range(file_key, first, last).await?;
        self.completed_ranges.fetch_add(1, Ordering::SeqCst);
        Ok(chunks)
    }
}

delegate_to_inner!(FailingRangeStore);

/// Rewrites the file with `replacement` right after the first fetch of the
/// range starting at chunk 0. Other range fetches are delayed by `delay`, so
/// they see the new content while the first batch holds the old one.
#[allow(dead_code)]
pub struct RacingStore {
    inner: Arc<dyn TableStore>,
    replacement: Vec<Chunk>,
    delay: Duration,
    raced: AtomicBool,
}

#[allow(dead_code)]
impl RacingStore {
    pub fn new(inner: Arc<dyn TableStore>, replacement: Vec<Chunk>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            replacement,
            delay,
            raced: AtomicBool::new(false),
        })
    }

    /// Whether the rewrite has happened.
    pub fn raced(&self) -> bool {
        self.raced.load(Ordering::SeqCst)
    }

    async fn fetch_range(
        &self,
        file_key: &FileKey,
        first: u32,
        last: u32,
    ) -> StoreResult<Vec<Chunk>> {
        if first == 0 {
            let chunks = self.inner.fetch_chunk_range(file_key, first, last).await?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.replace_chunks(file_key, &self.replacement).await?;
            }
            return Ok(chunks);
        }
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_chunk_range(file_key, first, last).await
    }
}

delegate_to_inner!(RacingStore);
