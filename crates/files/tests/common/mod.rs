//! Common test utilities and fixtures.

use rowgrid_core::{DatabaseConfig, FilesConfig};
use rowgrid_files::Database;
use tempfile::TempDir;

/// Route `tracing` output to the test harness.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small chunks so every file spans several rows.
#[allow(dead_code)]
pub fn small_chunks() -> FilesConfig {
    FilesConfig {
        chunk_size: 4,
        read_concurrency: 4,
        parallel_read_threshold: 8,
        read_batch_size: 3,
    }
}

/// A private in-memory database.
#[allow(dead_code)]
pub async fn memory_db(alias: &str) -> Database {
    init_tracing();
    Database::open(alias, &DatabaseConfig::default(), &small_chunks())
        .await
        .expect("Failed to open in-memory database")
}

/// A file-backed database in a temp directory, removed with the `TempDir`.
#[allow(dead_code)]
pub async fn file_db(alias: &str) -> (Database, TempDir) {
    init_tracing();
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = DatabaseConfig::sqlite(temp_dir.path().join("files.db"));
    let db = Database::open(alias, &config, &small_chunks())
        .await
        .expect("Failed to open SQLite database");
    (db, temp_dir)
}
