//! Record repository.

use crate::error::StoreResult;
use async_trait::async_trait;
use rowgrid_core::{FileKey, ModelSchema, Values};

/// Row operations on model tables described by a [`ModelSchema`].
///
/// Only columns with inline storage are touched; file columns live in the
/// chunk table. Primary keys are database-assigned integers.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// Create the table and its indexes if they do not exist.
    async fn create_table(&self, schema: &ModelSchema) -> StoreResult<()>;

    /// Drop the table if it exists.
    async fn drop_table(&self, schema: &ModelSchema) -> StoreResult<()>;

    /// Insert a row and return its primary key.
    async fn insert_record(&self, schema: &ModelSchema, values: &Values) -> StoreResult<i64>;

    /// Update the columns present in `values`. Fails with `NotFound` if no
    /// row has the primary key.
    async fn update_record(&self, schema: &ModelSchema, pk: i64, values: &Values)
    -> StoreResult<()>;

    /// Fetch one row by primary key.
    async fn fetch_record(&self, schema: &ModelSchema, pk: i64) -> StoreResult<Option<Values>>;

    /// Fetch all rows ordered by primary key.
    async fn fetch_records(&self, schema: &ModelSchema) -> StoreResult<Vec<(i64, Values)>>;

    /// Delete a row and the chunks of `file_keys` in one transaction.
    ///
    /// Returns whether a row was removed. When no row has the primary key
    /// nothing is deleted, chunks included.
    async fn delete_record(
        &self,
        schema: &ModelSchema,
        pk: i64,
        file_keys: &[FileKey],
    ) -> StoreResult<bool>;

    /// Count rows.
    async fn count_records(&self, schema: &ModelSchema) -> StoreResult<u64>;
}
