//! Configuration types shared across crates.

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, Result};

/// Path value that selects an in-memory SQLite database.
pub const SQLITE_MEMORY: &str = ":memory:";

/// Environment variable consulted when no database is configured.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

impl Config {
    /// Load configuration from an optional TOML file, overridden by
    /// `ROWGRID_`-prefixed environment variables (`ROWGRID_FILES__CHUNK_SIZE`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("ROWGRID_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.files.validate()
    }
}

/// Database handle configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseConfig {
    /// SQLite database file, or `:memory:`.
    Sqlite {
        path: PathBuf,
        /// Pool size. In-memory databases always use a single connection.
        #[serde(default = "default_sqlite_connections")]
        max_connections: u32,
        /// How long a connection waits on a locked database.
        #[serde(default = "default_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
    /// PostgreSQL server.
    Postgres {
        url: String,
        #[serde(default = "default_pg_connections")]
        max_connections: u32,
        /// Server-side statement timeout in milliseconds.
        statement_timeout_ms: Option<u64>,
    },
}

fn default_sqlite_connections() -> u32 {
    4
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_pg_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::sqlite(SQLITE_MEMORY)
    }
}

impl DatabaseConfig {
    /// SQLite at `path` with default pool settings.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::Sqlite {
            path: path.into(),
            max_connections: default_sqlite_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }

    /// Parse a database URL.
    ///
    /// Accepted forms: `sqlite://` and `sqlite::memory:` (in-memory),
    /// `sqlite:///abs/path.db`, `sqlite://rel/path.db`, `sqlite:path.db`,
    /// `postgres://...` and `postgresql://...`.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Self::Postgres {
                url: url.to_string(),
                max_connections: default_pg_connections(),
                statement_timeout_ms: None,
            });
        }
        let Some(rest) = url.strip_prefix("sqlite:") else {
            return Err(Error::Config(format!("unsupported database url: {url}")));
        };
        let path = rest.strip_prefix("//").unwrap_or(rest);
        let path = path.split('?').next().unwrap_or_default();
        if path.is_empty() || path == SQLITE_MEMORY || path == "/:memory:" {
            return Ok(Self::sqlite(SQLITE_MEMORY));
        }
        Ok(Self::sqlite(path))
    }

    /// Read `DATABASE_URL`, falling back to in-memory SQLite.
    pub fn from_env() -> Result<Self> {
        match std::env::var(DATABASE_URL_ENV) {
            Ok(url) if !url.is_empty() => Self::from_url(&url),
            _ => Ok(Self::default()),
        }
    }

    /// Whether this is an in-memory SQLite database.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Sqlite { path, .. } if path.as_os_str() == SQLITE_MEMORY)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Sqlite {
                path,
                max_connections,
                ..
            } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::Config("sqlite path must not be empty".to_string()));
                }
                if *max_connections == 0 {
                    return Err(Error::Config(
                        "sqlite max_connections must be at least 1".to_string(),
                    ));
                }
            }
            Self::Postgres {
                url,
                max_connections,
                ..
            } => {
                if url.is_empty() {
                    return Err(Error::Config("postgres url must not be empty".to_string()));
                }
                if *max_connections == 0 {
                    return Err(Error::Config(
                        "postgres max_connections must be at least 1".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// File chunking and read tuning.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesConfig {
    /// Maximum chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Maximum concurrent range fetches per read.
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
    /// Files with fewer chunks than this are read sequentially.
    #[serde(default = "default_parallel_read_threshold")]
    pub parallel_read_threshold: u32,
    /// Chunks fetched per range query.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: u32,
}

fn default_chunk_size() -> usize {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_read_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(32)
}

fn default_parallel_read_threshold() -> u32 {
    32
}

fn default_read_batch_size() -> u32 {
    10
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            read_concurrency: default_read_concurrency(),
            parallel_read_threshold: default_parallel_read_threshold(),
            read_batch_size: default_read_batch_size(),
        }
    }
}

impl FilesConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::InvalidChunkSize {
                size: self.chunk_size,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            });
        }
        if self.read_concurrency == 0 {
            return Err(Error::Config(
                "read_concurrency must be at least 1".to_string(),
            ));
        }
        if self.read_batch_size == 0 {
            return Err(Error::Config(
                "read_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
