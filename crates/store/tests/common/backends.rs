//! Table store test utilities.

use rowgrid_store::{PostgresStore, SqliteStore, StoreError, StoreResult, TableStore};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// A SQLite table store, file-backed in a temp directory removed on drop.
pub struct TestStore {
    sqlite: Arc<SqliteStore>,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// File-backed SQLite with a small connection pool.
    pub async fn new() -> StoreResult<Self> {
        let temp_dir = tempfile::tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let sqlite = SqliteStore::new(&db_path, 4, Duration::from_secs(5)).await?;

        Ok(Self {
            sqlite: Arc::new(sqlite),
            _temp_dir: Some(temp_dir),
        })
    }

    /// In-memory SQLite (single connection).
    #[allow(dead_code)]
    pub async fn in_memory() -> StoreResult<Self> {
        Ok(Self {
            sqlite: Arc::new(SqliteStore::in_memory().await?),
            _temp_dir: None,
        })
    }

    pub fn store(&self) -> Arc<dyn TableStore> {
        self.sqlite.clone()
    }

    /// The SQLite pool, for raw queries.
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite.pool()
    }
}

/// PostgreSQL table store backed by a testcontainer.
pub struct PostgresTestStore {
    store: Arc<dyn TableStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestStore {
    pub async fn new() -> StoreResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| StoreError::Internal(format!("failed to start PostgreSQL: {e}")))?;

        let host = container
            .get_host()
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let store = PostgresStore::from_url(&url, 5, None).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn TableStore> {
        self.store.clone()
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
///
/// PostgreSQL is skipped when `SKIP_POSTGRES_TESTS` is set or Docker is not
/// available.
#[allow(dead_code)]
pub async fn run_store_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn TableStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    super::init_tracing();

    let sqlite = TestStore::new()
        .await
        .expect("Failed to create SQLite test store");
    test_fn.clone()(sqlite.store()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestStore::new().await {
            Ok(postgres) => test_fn(postgres.store()).await,
            Err(err) => eprintln!("Skipping PostgreSQL store tests: {err}"),
        }
    }
}
