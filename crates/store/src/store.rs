//! Table store trait and the SQLite implementation.

use crate::error::{StoreError, StoreResult};
use crate::repos::{ChunkRepo, RecordRepo};
use async_trait::async_trait;
use rowgrid_core::config::SQLITE_MEMORY;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined table store trait: everything a database handle offers.
#[async_trait]
pub trait TableStore: ChunkRepo + RecordRepo + Send + Sync {
    /// Create the chunk table and its index if missing.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> StoreResult<()>;

    /// Short backend name for logs ("sqlite", "postgres").
    fn backend_name(&self) -> &'static str;
}

/// SQLite-based table store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite database file.
    ///
    /// The path `:memory:` opens a private in-memory database. Such a
    /// database lives in a single connection, so the pool is pinned to one
    /// connection that is never recycled.
    pub async fn new(
        path: impl AsRef<Path>,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == SQLITE_MEMORY;

        let pool = if in_memory {
            let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                // Writers queue behind each other instead of failing with
                // "database is locked" while parallel readers hold connections.
                .busy_timeout(busy_timeout);

            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(opts)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            in_memory,
            max_connections,
            "Opened SQLite table store"
        );

        Ok(store)
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new(SQLITE_MEMORY, 1, Duration::from_secs(5)).await
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl TableStore for SqliteStore {
    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

// Implement the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::{ChunkRow, FileInfo, non_negative, rows_into_chunks};
    use crate::sql::{self, Dialect};
    use rowgrid_core::{Chunk, ColumnKind, FileKey, ModelSchema, Value, Values};
    use sqlx::Row;
    use sqlx::query::Query;
    use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
    use time::OffsetDateTime;

    type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn replace_chunks(&self, file_key: &FileKey, chunks: &[Chunk]) -> StoreResult<()> {
            // Single transaction: the old chunks stay visible until commit
            let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

            sqlx::query("DELETE FROM file_chunks WHERE file_key = ?")
                .bind(file_key.as_str())
                .execute(&mut *tx)
                .await?;

            for chunk in chunks {
                insert_chunk(&mut *tx, file_key, chunk.sequence, &chunk.payload).await?;
            }
            bump_generation(&mut *tx, file_key).await?;

            tx.commit().await?;
            Ok(())
        }

        async fn append_chunks(&self, file_key: &FileKey, chunks: &[Chunk]) -> StoreResult<u32> {
            // IMMEDIATE takes the write lock before MAX() is read; a deferred
            // transaction fails with SQLITE_BUSY_SNAPSHOT once another
            // appender commits in between.
            let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

            let (max_sequence, size): (Option<i64>, i64) = sqlx::query_as(
                "SELECT MAX(sequence), COALESCE(SUM(LENGTH(payload)), 0) FROM file_chunks WHERE file_key = ?",
            )
            .bind(file_key.as_str())
            .fetch_one(&mut *tx)
            .await?;

            let has_data = chunks.iter().any(|c| !c.payload.is_empty());
            let first = match max_sequence {
                None => 0,
                // An empty file is a lone empty chunk; real data replaces it
                Some(0) if size == 0 && has_data => {
                    sqlx::query("DELETE FROM file_chunks WHERE file_key = ?")
                        .bind(file_key.as_str())
                        .execute(&mut *tx)
                        .await?;
                    0
                }
                Some(max) => non_negative::<u32>("chunk sequence", max + 1)?,
            };

            let to_insert = chunks.iter().filter(|c| first == 0 || !c.payload.is_empty());
            for (offset, chunk) in (0u32..).zip(to_insert) {
                insert_chunk(&mut *tx, file_key, first + offset, &chunk.payload).await?;
            }
            bump_generation(&mut *tx, file_key).await?;

            tx.commit().await?;
            Ok(first)
        }

        async fn fetch_chunks(&self, file_key: &FileKey) -> StoreResult<Vec<Chunk>> {
            let rows = sqlx::query_as::<_, ChunkRow>(
                "SELECT file_key, sequence, payload FROM file_chunks WHERE file_key = ? ORDER BY sequence",
            )
            .bind(file_key.as_str())
            .fetch_all(&self.pool)
            .await?;
            rows_into_chunks(rows)
        }

        async fn fetch_chunk_range(
            &self,
            file_key: &FileKey,
            first: u32,
            last: u32,
        ) -> StoreResult<Vec<Chunk>> {
            let rows = sqlx::query_as::<_, ChunkRow>(
                r#"
                SELECT file_key, sequence, payload FROM file_chunks
                WHERE file_key = ? AND sequence BETWEEN ? AND ?
                ORDER BY sequence
                "#,
            )
            .bind(file_key.as_str())
            .bind(i64::from(first))
            .bind(i64::from(last))
            .fetch_all(&self.pool)
            .await?;
            rows_into_chunks(rows)
        }

        async fn count_chunks(&self, file_key: &FileKey) -> StoreResult<u32> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM file_chunks WHERE file_key = ?")
                    .bind(file_key.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            non_negative("chunk count", count)
        }

        async fn file_info(&self, file_key: &FileKey) -> StoreResult<Option<FileInfo>> {
            let (count, size): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM file_chunks WHERE file_key = ?",
            )
            .bind(file_key.as_str())
            .fetch_one(&self.pool)
            .await?;

            if count == 0 {
                return Ok(None);
            }
            Ok(Some(FileInfo {
                file_key: file_key.clone(),
                size: non_negative("file size", size)?,
                chunks: non_negative("chunk count", count)?,
            }))
        }

        async fn delete_chunks(&self, file_key: &FileKey) -> StoreResult<u64> {
            let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
            let removed = delete_file(&mut *tx, file_key).await?;
            tx.commit().await?;
            Ok(removed)
        }

        async fn file_generation(&self, file_key: &FileKey) -> StoreResult<u64> {
            let generation: Option<i64> =
                sqlx::query_scalar("SELECT generation FROM file_generations WHERE file_key = ?")
                    .bind(file_key.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            generation.map_or(Ok(0), |g| non_negative("file generation", g))
        }

        async fn file_exists(&self, file_key: &FileKey) -> StoreResult<bool> {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM file_chunks WHERE file_key = ? LIMIT 1")
                    .bind(file_key.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.is_some())
        }

        async fn list_file_keys(&self, like: Option<&str>) -> StoreResult<Vec<String>> {
            let keys = match like {
                Some(like) => {
                    sqlx::query_scalar(
                        r"SELECT DISTINCT file_key FROM file_chunks WHERE file_key LIKE ? ESCAPE '\' ORDER BY file_key",
                    )
                    .bind(like)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_scalar(
                        "SELECT DISTINCT file_key FROM file_chunks ORDER BY file_key",
                    )
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(keys)
        }
    }

    async fn insert_chunk(
        conn: &mut SqliteConnection,
        file_key: &FileKey,
        sequence: u32,
        payload: &[u8],
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO file_chunks (file_key, sequence, payload) VALUES (?, ?, ?)")
            .bind(file_key.as_str())
            .bind(i64::from(sequence))
            .bind(payload)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn bump_generation(conn: &mut SqliteConnection, file_key: &FileKey) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO file_generations (file_key, generation) VALUES (?, 1) \
             ON CONFLICT(file_key) DO UPDATE SET generation = generation + 1",
        )
        .bind(file_key.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Delete a file's chunks, bumping its generation if any existed.
    async fn delete_file(conn: &mut SqliteConnection, file_key: &FileKey) -> StoreResult<u64> {
        let removed = sqlx::query("DELETE FROM file_chunks WHERE file_key = ?")
            .bind(file_key.as_str())
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if removed > 0 {
            bump_generation(conn, file_key).await?;
        }
        Ok(removed)
    }

    fn bind_value<'q>(query: SqliteQuery<'q>, kind: ColumnKind, value: &Value) -> SqliteQuery<'q> {
        match value {
            Value::Null => match kind {
                ColumnKind::Integer => query.bind(None::<i64>),
                ColumnKind::Boolean => query.bind(None::<bool>),
                ColumnKind::Float => query.bind(None::<f64>),
                ColumnKind::Bytes => query.bind(None::<Vec<u8>>),
                ColumnKind::Timestamp => query.bind(None::<OffsetDateTime>),
                ColumnKind::Text | ColumnKind::Json | ColumnKind::File => {
                    query.bind(None::<String>)
                }
            },
            Value::Bool(v) => query.bind(*v),
            Value::Integer(v) if kind == ColumnKind::Float => query.bind(*v as f64),
            Value::Integer(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Bytes(v) => query.bind(v.clone()),
            Value::Json(v) => query.bind(v.to_string()),
            Value::Timestamp(v) => query.bind(*v),
        }
    }

    fn decode_row(schema: &ModelSchema, row: &SqliteRow) -> StoreResult<(i64, Values)> {
        let pk: i64 = row.try_get(schema.primary_key.as_str())?;
        let mut values = Values::new();
        for column in schema.stored_columns() {
            let name = column.name.as_str();
            let value: Value = match column.kind {
                ColumnKind::Text => row.try_get::<Option<String>, _>(name)?.into(),
                ColumnKind::Integer => row.try_get::<Option<i64>, _>(name)?.into(),
                ColumnKind::Boolean => row.try_get::<Option<bool>, _>(name)?.into(),
                ColumnKind::Float => row.try_get::<Option<f64>, _>(name)?.into(),
                ColumnKind::Bytes => row.try_get::<Option<Vec<u8>>, _>(name)?.into(),
                ColumnKind::Timestamp => row.try_get::<Option<OffsetDateTime>, _>(name)?.into(),
                ColumnKind::Json => match row.try_get::<Option<String>, _>(name)? {
                    Some(text) => sql::decode_json(name, text)?,
                    None => Value::Null,
                },
                ColumnKind::File => continue,
            };
            values.insert(column.name.clone(), value);
        }
        Ok((pk, values))
    }

    #[async_trait]
    impl RecordRepo for SqliteStore {
        async fn create_table(&self, schema: &ModelSchema) -> StoreResult<()> {
            for statement in sql::create_table_statements(schema, Dialect::Sqlite) {
                sqlx::query(&statement).execute(&self.pool).await?;
            }
            Ok(())
        }

        async fn drop_table(&self, schema: &ModelSchema) -> StoreResult<()> {
            sqlx::query(&sql::drop_table_statement(schema))
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn insert_record(&self, schema: &ModelSchema, values: &Values) -> StoreResult<i64> {
            let columns = sql::bound_columns(schema, values)?;
            let statement = sql::insert_statement(schema, &columns, Dialect::Sqlite);
            let mut query = sqlx::query(&statement);
            for (column, value) in &columns {
                query = bind_value(query, column.kind, value);
            }
            let row = query.fetch_one(&self.pool).await?;
            Ok(row.try_get::<i64, _>(0)?)
        }

        async fn update_record(
            &self,
            schema: &ModelSchema,
            pk: i64,
            values: &Values,
        ) -> StoreResult<()> {
            let columns = sql::bound_columns(schema, values)?;
            if columns.is_empty() {
                return match self.fetch_record(schema, pk).await? {
                    Some(_) => Ok(()),
                    None => Err(StoreError::NotFound(format!("{} {pk}", schema.name))),
                };
            }
            let statement = sql::update_statement(schema, &columns, Dialect::Sqlite);
            let mut query = sqlx::query(&statement);
            for (column, value) in &columns {
                query = bind_value(query, column.kind, value);
            }
            let result = query.bind(pk).execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("{} {pk}", schema.name)));
            }
            Ok(())
        }

        async fn fetch_record(&self, schema: &ModelSchema, pk: i64) -> StoreResult<Option<Values>> {
            let statement = format!(
                "SELECT {} FROM {} WHERE {} = ?",
                sql::select_list(schema),
                sql::quote(&schema.table_name),
                sql::quote(&schema.primary_key)
            );
            let row = sqlx::query(&statement)
                .bind(pk)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|row| decode_row(schema, &row).map(|(_, values)| values))
                .transpose()
        }

        async fn fetch_records(&self, schema: &ModelSchema) -> StoreResult<Vec<(i64, Values)>> {
            let statement = format!(
                "SELECT {} FROM {} ORDER BY {}",
                sql::select_list(schema),
                sql::quote(&schema.table_name),
                sql::quote(&schema.primary_key)
            );
            let rows = sqlx::query(&statement).fetch_all(&self.pool).await?;
            rows.iter().map(|row| decode_row(schema, row)).collect()
        }

        async fn delete_record(
            &self,
            schema: &ModelSchema,
            pk: i64,
            file_keys: &[FileKey],
        ) -> StoreResult<bool> {
            let statement = format!(
                "DELETE FROM {} WHERE {} = ?",
                sql::quote(&schema.table_name),
                sql::quote(&schema.primary_key)
            );
            let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
            let removed = sqlx::query(&statement)
                .bind(pk)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if removed == 0 {
                tx.rollback().await?;
                return Ok(false);
            }
            for file_key in file_keys {
                delete_file(&mut *tx, file_key).await?;
            }
            tx.commit().await?;
            Ok(true)
        }

        async fn count_records(&self, schema: &ModelSchema) -> StoreResult<u64> {
            let statement = format!("SELECT COUNT(*) FROM {}", sql::quote(&schema.table_name));
            let count: i64 = sqlx::query_scalar(&statement).fetch_one(&self.pool).await?;
            non_negative("record count", count)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- File chunks: one row per chunk, contiguous sequences from 0 per file_key
CREATE TABLE IF NOT EXISTS file_chunks (
    file_key TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (file_key, sequence)
);
CREATE INDEX IF NOT EXISTS idx_file_chunks_key ON file_chunks(file_key);

-- Bumped in the same transaction as every change to a file's chunks
CREATE TABLE IF NOT EXISTS file_generations (
    file_key TEXT PRIMARY KEY,
    generation INTEGER NOT NULL
);
"#;
