//! Database handles and the alias registry.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock};
use rowgrid_core::{Config, DatabaseConfig, FilesConfig};
use rowgrid_store::{ChunkStore, TableStore};

use crate::error::{FilesError, FilesResult};

/// Alias used when no other handle is selected.
pub const DEFAULT_ALIAS: &str = "default";

static GLOBAL: LazyLock<Registry> = LazyLock::new(|| Registry::new(FilesConfig::default()));

/// A connected database: the table store plus the chunk store over it.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    alias: String,
    chunks: ChunkStore,
}

impl Database {
    /// Wrap an open table store.
    pub fn new(
        alias: impl Into<String>,
        backend: Arc<dyn TableStore>,
        files: &FilesConfig,
    ) -> FilesResult<Self> {
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                alias: alias.into(),
                chunks: ChunkStore::new(backend, files)?,
            }),
        })
    }

    /// Open the database described by `config`.
    pub async fn open(
        alias: impl Into<String>,
        config: &DatabaseConfig,
        files: &FilesConfig,
    ) -> FilesResult<Self> {
        let backend = rowgrid_store::from_config(config).await?;
        Self::new(alias, backend, files)
    }

    /// Private in-memory SQLite database, mostly for tests.
    pub async fn in_memory(alias: impl Into<String>) -> FilesResult<Self> {
        Self::open(alias, &DatabaseConfig::default(), &FilesConfig::default()).await
    }

    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.inner.chunks
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        self.inner.chunks.backend()
    }

    /// File API bound to this database.
    pub fn files(&self) -> crate::Files {
        crate::Files::new(self.clone())
    }

    /// Whether both handles share one connection pool.
    pub fn same_as(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("alias", &self.inner.alias)
            .field("backend", &self.store().backend_name())
            .finish()
    }
}

/// Named database handles plus a stack of ambient defaults.
///
/// The stack top is the database used by operations that are not given one
/// explicitly. When the stack is empty the handle registered as
/// [`DEFAULT_ALIAS`] is used.
pub struct Registry {
    files: FilesConfig,
    databases: RwLock<HashMap<String, Database>>,
    stack: Mutex<Vec<Database>>,
}

impl Registry {
    pub fn new(files: FilesConfig) -> Self {
        Self {
            files,
            databases: RwLock::new(HashMap::new()),
            stack: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Connect to a database URL and register it under `alias`.
    ///
    /// An existing handle with the same alias is replaced.
    pub async fn connect(&self, url: &str, alias: &str) -> FilesResult<Database> {
        let config = DatabaseConfig::from_url(url)?;
        let database = Database::open(alias, &config, &self.files).await?;
        self.register(database.clone());
        Ok(database)
    }

    /// Connect using a full configuration, including its file tuning.
    pub async fn connect_config(&self, config: &Config, alias: &str) -> FilesResult<Database> {
        config.validate()?;
        let database = Database::open(alias, &config.database, &config.files).await?;
        self.register(database.clone());
        Ok(database)
    }

    /// Register an open database under its alias, returning the handle it
    /// replaced.
    pub fn register(&self, database: Database) -> Option<Database> {
        let alias = database.alias().to_string();
        let previous = self.databases.write().insert(alias.clone(), database);
        if previous.is_some() {
            tracing::debug!(alias = %alias, "Replaced registered database");
        } else {
            tracing::debug!(alias = %alias, "Registered database");
        }
        previous
    }

    /// Remove a handle. Pools close once the last clone is dropped.
    pub fn disconnect(&self, alias: &str) -> Option<Database> {
        self.databases.write().remove(alias)
    }

    /// Look up a handle by alias.
    pub fn get(&self, alias: &str) -> FilesResult<Database> {
        self.databases
            .read()
            .get(alias)
            .cloned()
            .ok_or_else(|| FilesError::NotFound(format!("database alias '{alias}'")))
    }

    /// Registered aliases in ascending order.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.databases.read().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// The ambient database: the stack top, else the default alias.
    pub fn current(&self) -> FilesResult<Database> {
        if let Some(database) = self.stack.lock().last() {
            return Ok(database.clone());
        }
        self.get(DEFAULT_ALIAS)
    }

    /// Make the database registered as `alias` the ambient one until the
    /// returned guard is dropped.
    pub fn using(&self, alias: &str) -> FilesResult<UsingGuard<'_>> {
        let database = self.get(alias)?;
        Ok(self.push(database))
    }

    /// Make `database` the ambient one until the guard is dropped.
    pub fn push(&self, database: Database) -> UsingGuard<'_> {
        let mut stack = self.stack.lock();
        let depth = stack.len();
        stack.push(database);
        UsingGuard {
            registry: self,
            depth,
        }
    }

    /// File tuning applied to databases opened through this registry.
    pub fn files_config(&self) -> &FilesConfig {
        &self.files
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(FilesConfig::default())
    }
}

/// Restores the ambient database stack when dropped.
#[must_use = "the ambient database is restored as soon as the guard is dropped"]
pub struct UsingGuard<'a> {
    registry: &'a Registry,
    depth: usize,
}

impl UsingGuard<'_> {
    /// The database this guard made ambient.
    pub fn database(&self) -> Option<Database> {
        self.registry.stack.lock().get(self.depth).cloned()
    }
}

impl Drop for UsingGuard<'_> {
    fn drop(&mut self) {
        // Also discards entries of inner guards that were leaked
        self.registry.stack.lock().truncate(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = Registry::default();
        assert!(registry.get("main").unwrap_err().is_not_found());

        let db = Database::in_memory("main").await.unwrap();
        assert!(registry.register(db.clone()).is_none());
        assert!(registry.get("main").unwrap().same_as(&db));
        assert_eq!(registry.aliases(), vec!["main".to_string()]);

        assert!(registry.disconnect("main").is_some());
        assert!(registry.get("main").is_err());
    }

    #[tokio::test]
    async fn test_using_nests_and_restores() {
        let registry = Registry::default();
        let default = Database::in_memory(DEFAULT_ALIAS).await.unwrap();
        let other = Database::in_memory("other").await.unwrap();
        let third = Database::in_memory("third").await.unwrap();
        registry.register(default.clone());
        registry.register(other.clone());
        registry.register(third.clone());

        assert!(registry.current().unwrap().same_as(&default));
        {
            let outer = registry.using("other").unwrap();
            assert!(outer.database().unwrap().same_as(&other));
            assert!(registry.current().unwrap().same_as(&other));
            {
                let _inner = registry.using("third").unwrap();
                assert!(registry.current().unwrap().same_as(&third));
            }
            assert!(registry.current().unwrap().same_as(&other));
        }
        assert!(registry.current().unwrap().same_as(&default));
    }

    #[tokio::test]
    async fn test_using_unknown_alias() {
        let registry = Registry::default();
        assert!(registry.using("nope").err().unwrap().is_not_found());
        assert!(registry.current().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_connect_url() {
        let registry = Registry::default();
        let db = registry.connect("sqlite::memory:", "mem").await.unwrap();
        db.store().health_check().await.unwrap();
        assert_eq!(db.alias(), "mem");

        let err = registry.connect("mysql://localhost/db", "bad").await.unwrap_err();
        assert!(err.is_validation());
    }
}
