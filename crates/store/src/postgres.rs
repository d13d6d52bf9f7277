//! PostgreSQL-based table store implementation.

use crate::error::{StoreError, StoreResult};
use crate::models::{ChunkRow, FileInfo, non_negative, rows_into_chunks};
use crate::repos::{ChunkRepo, RecordRepo};
use crate::sql::{self, Dialect};
use crate::store::TableStore;
use async_trait::async_trait;
use rowgrid_core::{Chunk, ColumnKind, FileKey, ModelSchema, Value, Values};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row};
use std::str::FromStr;
use time::OffsetDateTime;

const POSTGRES_SCHEMA: &str = r#"
-- File chunks: one row per chunk, contiguous sequences from 0 per file_key
CREATE TABLE IF NOT EXISTS file_chunks (
    file_key TEXT NOT NULL,
    sequence BIGINT NOT NULL,
    payload BYTEA NOT NULL,
    PRIMARY KEY (file_key, sequence)
);
CREATE INDEX IF NOT EXISTS idx_file_chunks_key ON file_chunks(file_key);

-- Bumped in the same transaction as every change to a file's chunks
CREATE TABLE IF NOT EXISTS file_generations (
    file_key TEXT PRIMARY KEY,
    generation BIGINT NOT NULL
);
"#;

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL-based table store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a `postgres://` URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> StoreResult<Self> {
        let mut opts = PgConnectOptions::from_str(url)?;

        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(max_connections, "Opened PostgreSQL table store");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl TableStore for PostgresStore {
    async fn migrate(&self) -> StoreResult<()> {
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

// Serialize writers of the same key; MAX() cannot take row locks
async fn lock_file(conn: &mut PgConnection, file_key: &FileKey) -> StoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(file_key.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_chunk(
    conn: &mut PgConnection,
    file_key: &FileKey,
    sequence: u32,
    payload: &[u8],
) -> StoreResult<()> {
    sqlx::query("INSERT INTO file_chunks (file_key, sequence, payload) VALUES ($1, $2, $3)")
        .bind(file_key.as_str())
        .bind(i64::from(sequence))
        .bind(payload)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn bump_generation(conn: &mut PgConnection, file_key: &FileKey) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO file_generations (file_key, generation) VALUES ($1, 1)
        ON CONFLICT (file_key) DO UPDATE SET generation = file_generations.generation + 1
        "#,
    )
    .bind(file_key.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete a file's chunks under its lock, bumping the generation if any
/// existed.
async fn delete_file(conn: &mut PgConnection, file_key: &FileKey) -> StoreResult<u64> {
    lock_file(conn, file_key).await?;
    let removed = sqlx::query("DELETE FROM file_chunks WHERE file_key = $1")
        .bind(file_key.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if removed > 0 {
        bump_generation(conn, file_key).await?;
    }
    Ok(removed)
}

#[async_trait]
impl ChunkRepo for PostgresStore {
    async fn replace_chunks(&self, file_key: &FileKey, chunks: &[Chunk]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_file(&mut *tx, file_key).await?;

        sqlx::query("DELETE FROM file_chunks WHERE file_key = $1")
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
        let mut tx = self.pool.begin().await?;
        lock_file(&mut *tx, file_key).await?;

        let (max_sequence, size): (Option<i64>, i64) = sqlx::query_as(
            "SELECT MAX(sequence), COALESCE(SUM(octet_length(payload)), 0)::BIGINT FROM file_chunks WHERE file_key = $1",
        )
        .bind(file_key.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let has_data = chunks.iter().any(|c| !c.payload.is_empty());
        let first = match max_sequence {
            None => 0,
            Some(0) if size == 0 && has_data => {
                sqlx::query("DELETE FROM file_chunks WHERE file_key = $1")
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
            "SELECT file_key, sequence, payload FROM file_chunks WHERE file_key = $1 ORDER BY sequence",
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
            WHERE file_key = $1 AND sequence BETWEEN $2 AND $3
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
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_chunks WHERE file_key = $1")
            .bind(file_key.as_str())
            .fetch_one(&self.pool)
            .await?;
        non_negative("chunk count", count)
    }

    async fn file_info(&self, file_key: &FileKey) -> StoreResult<Option<FileInfo>> {
        let (count, size): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(octet_length(payload)), 0)::BIGINT FROM file_chunks WHERE file_key = $1",
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
        let mut tx = self.pool.begin().await?;
        let removed = delete_file(&mut *tx, file_key).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn file_generation(&self, file_key: &FileKey) -> StoreResult<u64> {
        let generation: Option<i64> =
            sqlx::query_scalar("SELECT generation FROM file_generations WHERE file_key = $1")
                .bind(file_key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        generation.map_or(Ok(0), |g| non_negative("file generation", g))
    }

    async fn file_exists(&self, file_key: &FileKey) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM file_chunks WHERE file_key = $1)")
                .bind(file_key.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list_file_keys(&self, like: Option<&str>) -> StoreResult<Vec<String>> {
        let keys = match like {
            Some(like) => {
                sqlx::query_scalar(
                    r"SELECT DISTINCT file_key FROM file_chunks WHERE file_key LIKE $1 ESCAPE '\' ORDER BY file_key",
                )
                .bind(like)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT DISTINCT file_key FROM file_chunks ORDER BY file_key")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(keys)
    }
}

// Postgres needs the NULL's type to match the column
fn bind_value<'q>(query: PgQuery<'q>, kind: ColumnKind, value: &Value) -> PgQuery<'q> {
    match value {
        Value::Null => match kind {
            ColumnKind::Integer => query.bind(None::<i64>),
            ColumnKind::Boolean => query.bind(None::<bool>),
            ColumnKind::Float => query.bind(None::<f64>),
            ColumnKind::Bytes => query.bind(None::<Vec<u8>>),
            ColumnKind::Timestamp => query.bind(None::<OffsetDateTime>),
            ColumnKind::Text | ColumnKind::Json | ColumnKind::File => query.bind(None::<String>),
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

fn decode_row(schema: &ModelSchema, row: &PgRow) -> StoreResult<(i64, Values)> {
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
impl RecordRepo for PostgresStore {
    async fn create_table(&self, schema: &ModelSchema) -> StoreResult<()> {
        for statement in sql::create_table_statements(schema, Dialect::Postgres) {
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
        let statement = sql::insert_statement(schema, &columns, Dialect::Postgres);
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
        let statement = sql::update_statement(schema, &columns, Dialect::Postgres);
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
            "SELECT {} FROM {} WHERE {} = $1",
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
            "DELETE FROM {} WHERE {} = $1",
            sql::quote(&schema.table_name),
            sql::quote(&schema.primary_key)
        );
        let mut tx = self.pool.begin().await?;
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
