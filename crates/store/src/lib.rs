//! Chunk and record tables for rowgrid.
//!
//! This crate owns everything that touches the database:
//! - The chunk table and row-level chunk operations
//! - Whole-file reads and writes, including parallel range fetches
//! - Tables for explicit model schemas
//! - SQLite and PostgreSQL backends behind one trait

pub mod chunk_store;
pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
mod sql;
pub mod store;

pub use chunk_store::{ChunkStore, ChunkStream, MAX_READ_ATTEMPTS};
pub use error::{StoreError, StoreResult};
pub use models::FileInfo;
pub use postgres::PostgresStore;
pub use repos::{ChunkRepo, RecordRepo};
pub use store::{SqliteStore, TableStore};

use rowgrid_core::DatabaseConfig;
use std::sync::Arc;
use std::time::Duration;

/// Open a table store from configuration.
pub async fn from_config(config: &DatabaseConfig) -> StoreResult<Arc<dyn TableStore>> {
    config.validate()?;
    match config {
        DatabaseConfig::Sqlite {
            path,
            max_connections,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(
                path,
                *max_connections,
                Duration::from_secs(*busy_timeout_secs),
            )
            .await?;
            Ok(Arc::new(store) as Arc<dyn TableStore>)
        }
        DatabaseConfig::Postgres {
            url,
            max_connections,
            statement_timeout_ms,
        } => {
            tracing::info!("Connecting to PostgreSQL using connection URL");
            let store =
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?;
            Ok(Arc::new(store) as Arc<dyn TableStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("files.db");
        let config = DatabaseConfig::sqlite(&db_path);

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let store = from_config(&DatabaseConfig::default()).await.unwrap();
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let config = DatabaseConfig::Sqlite {
            path: "files.db".into(),
            max_connections: 0,
            busy_timeout_secs: 5,
        };
        let err = from_config(&config).await.err().unwrap();
        assert!(err.is_validation());
    }
}
