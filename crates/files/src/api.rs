//! Key-addressed file API.

use bytes::Bytes;
use rowgrid_core::{FileKey, KeyPattern};
use rowgrid_store::FileInfo;

use crate::error::{FilesError, FilesResult};
use crate::handle::{FileHandle, OpenMode};
use crate::registry::{Database, Registry};

/// Attempts at generating an unused key before giving up.
const MAX_KEY_ATTEMPTS: usize = 8;

/// Store and fetch whole files by key.
///
/// A `Files` value is either bound to one [`Database`] or follows the
/// ambient database of the global [`Registry`], resolved again on every
/// call.
#[derive(Clone, Debug)]
pub struct Files {
    database: Option<Database>,
}

impl Files {
    /// File API bound to `database`.
    pub fn new(database: Database) -> Self {
        Self {
            database: Some(database),
        }
    }

    /// File API following [`Registry::current`] of the global registry.
    pub fn current() -> Self {
        Self { database: None }
    }

    /// The database the next operation will use.
    pub fn database(&self) -> FilesResult<Database> {
        match &self.database {
            Some(database) => Ok(database.clone()),
            None => Registry::global().current(),
        }
    }

    /// Replace the content of `key`.
    pub async fn write(&self, key: &str, data: impl Into<Bytes>) -> FilesResult<()> {
        let key = FileKey::new(key)?;
        self.database()?.chunks().write(&key, data).await?;
        Ok(())
    }

    /// Append to `key`, creating it if missing.
    pub async fn append(&self, key: &str, data: impl Into<Bytes>) -> FilesResult<()> {
        let key = FileKey::new(key)?;
        self.database()?.chunks().append(&key, data).await?;
        Ok(())
    }

    /// Read the whole content of `key`.
    pub async fn read(&self, key: &str) -> FilesResult<Bytes> {
        let key = FileKey::new(key)?;
        Ok(self.database()?.chunks().fetch(&key).await?)
    }

    /// Store `data` under `key`, or under a fresh random key when `key` is
    /// `None`. Returns the key used.
    pub async fn put(&self, data: impl Into<Bytes>, key: Option<&str>) -> FilesResult<FileKey> {
        let database = self.database()?;
        let chunks = database.chunks();
        let key = match key {
            Some(key) => FileKey::new(key)?,
            None => {
                let mut attempts = 0;
                loop {
                    let candidate = FileKey::generate();
                    if !chunks.exists(&candidate).await? {
                        break candidate;
                    }
                    attempts += 1;
                    tracing::warn!(file_key = %candidate, "Generated file key already in use");
                    if attempts >= MAX_KEY_ATTEMPTS {
                        return Err(FilesError::Validation(
                            "could not generate an unused file key".to_string(),
                        ));
                    }
                }
            }
        };
        chunks.write(&key, data).await?;
        Ok(key)
    }

    /// Open `key` for reading.
    pub async fn get(&self, key: &str) -> FilesResult<FileHandle> {
        self.open(key, OpenMode::Read).await
    }

    /// Open `key` in `mode`.
    pub async fn open(&self, key: &str, mode: OpenMode) -> FilesResult<FileHandle> {
        let key = FileKey::new(key)?;
        let chunks = self.database()?.chunks().clone();
        FileHandle::open(chunks, key, mode).await
    }

    pub async fn exists(&self, key: &str) -> FilesResult<bool> {
        let key = FileKey::new(key)?;
        Ok(self.database()?.chunks().exists(&key).await?)
    }

    /// Size and chunk count of `key`.
    pub async fn stat(&self, key: &str) -> FilesResult<FileInfo> {
        let key = FileKey::new(key)?;
        self.database()?
            .chunks()
            .stat(&key)
            .await?
            .ok_or_else(|| FilesError::NotFound(key.to_string()))
    }

    /// All stored keys in ascending order.
    pub async fn list(&self) -> FilesResult<Vec<String>> {
        Ok(self.database()?.chunks().list_keys(None).await?)
    }

    /// Keys matching a shell glob (`*`, `?`, `[...]`, `{a,b}`; `%` works
    /// like `*`).
    pub async fn find(&self, pattern: &str) -> FilesResult<Vec<String>> {
        let pattern = KeyPattern::new(pattern)?;
        Ok(self.database()?.chunks().list_keys(Some(&pattern)).await?)
    }

    /// Delete `key`. Deleting a missing key is not an error.
    pub async fn remove(&self, key: &str) -> FilesResult<()> {
        let key = FileKey::new(key)?;
        self.database()?.chunks().delete(&key).await?;
        Ok(())
    }
}

impl Default for Files {
    fn default() -> Self {
        Self::current()
    }
}
