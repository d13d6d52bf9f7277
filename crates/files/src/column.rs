//! File-typed record columns.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rowgrid_core::FileKey;

use crate::error::{FilesError, FilesResult};
use crate::handle::{FileHandle, OpenMode};
use crate::registry::Database;

/// Lifecycle callbacks a record runs on its file columns.
#[async_trait]
pub trait RecordHook: Send {
    /// The record row was written and has primary key `pk`.
    async fn after_save(&mut self, pk: i64) -> FilesResult<()>;

    /// The record is about to be deleted. Drops buffered work and returns
    /// the key whose chunks go away together with the row.
    fn on_delete(&mut self) -> FilesResult<Option<FileKey>>;
}

/// Work buffered on a column whose record has no primary key yet.
#[derive(Debug)]
enum Pending {
    Replace(BytesMut),
    Append(BytesMut),
    Remove,
}

/// The file stored for one column of one record.
///
/// Content lives in the chunk table under `"{table}/{pk}/{column}"`. Until
/// the record is saved there is no key, so writes are buffered here and
/// flushed by [`RecordHook::after_save`].
pub struct FileColumn {
    database: Database,
    table: String,
    column: String,
    pk: Option<i64>,
    pending: Option<Pending>,
}

impl FileColumn {
    /// Column of a record that has not been saved.
    pub fn new(database: Database, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            database,
            table: table.into(),
            column: column.into(),
            pk: None,
            pending: None,
        }
    }

    /// Column of a stored record.
    pub fn bound(
        database: Database,
        table: impl Into<String>,
        column: impl Into<String>,
        pk: i64,
    ) -> Self {
        Self {
            pk: Some(pk),
            ..Self::new(database, table, column)
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Whether writes are waiting for the record to be saved.
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// The chunk key, once the record has a primary key.
    pub fn key(&self) -> FilesResult<Option<FileKey>> {
        self.pk
            .map(|pk| FileKey::for_column(&self.table, pk, &self.column))
            .transpose()
            .map_err(FilesError::from)
    }

    fn require_key(&self) -> FilesResult<FileKey> {
        self.key()?.ok_or_else(|| {
            FilesError::Validation(format!(
                "{}.{}: save the record before opening its file",
                self.table, self.column
            ))
        })
    }

    /// Replace the content.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> FilesResult<()> {
        let data = data.into();
        match self.key()? {
            Some(key) => Ok(self.database.chunks().write(&key, data).await?),
            None => {
                self.pending = Some(Pending::Replace(BytesMut::from(&data[..])));
                Ok(())
            }
        }
    }

    /// Append to the content.
    pub async fn append(&mut self, data: impl Into<Bytes>) -> FilesResult<()> {
        let data = data.into();
        if let Some(key) = self.key()? {
            return Ok(self.database.chunks().append(&key, data).await?);
        }
        self.pending = Some(match self.pending.take() {
            Some(Pending::Replace(mut buf)) => {
                buf.extend_from_slice(&data);
                Pending::Replace(buf)
            }
            Some(Pending::Append(mut buf)) => {
                buf.extend_from_slice(&data);
                Pending::Append(buf)
            }
            // appending after a remove starts a new file
            Some(Pending::Remove) => Pending::Replace(BytesMut::from(&data[..])),
            None => Pending::Append(BytesMut::from(&data[..])),
        });
        Ok(())
    }

    /// The content, or `None` if the column holds no file.
    ///
    /// Before the record is saved this reflects buffered writes only.
    pub async fn read(&self) -> FilesResult<Option<Bytes>> {
        let Some(key) = self.key()? else {
            return Ok(match &self.pending {
                Some(Pending::Replace(buf)) | Some(Pending::Append(buf)) => {
                    Some(Bytes::copy_from_slice(buf))
                }
                Some(Pending::Remove) | None => None,
            });
        };
        match self.database.chunks().fetch(&key).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self) -> FilesResult<bool> {
        match self.key()? {
            Some(key) => Ok(self.database.chunks().exists(&key).await?),
            None => Ok(matches!(
                self.pending,
                Some(Pending::Replace(_) | Pending::Append(_))
            )),
        }
    }

    /// Open the stored file. The record must have been saved.
    pub async fn open(&self, mode: OpenMode) -> FilesResult<FileHandle> {
        let key = self.require_key()?;
        FileHandle::open(self.database.chunks().clone(), key, mode).await
    }

    /// Open the stored file for reading.
    pub async fn handle(&self) -> FilesResult<FileHandle> {
        self.open(OpenMode::Read).await
    }

    /// Delete the content.
    pub async fn remove(&mut self) -> FilesResult<()> {
        match self.key()? {
            Some(key) => {
                self.pending = None;
                self.database.chunks().delete(&key).await?;
            }
            None => self.pending = Some(Pending::Remove),
        }
        Ok(())
    }
}

#[async_trait]
impl RecordHook for FileColumn {
    async fn after_save(&mut self, pk: i64) -> FilesResult<()> {
        self.pk = Some(pk);
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let key = self.require_key()?;
        let chunks = self.database.chunks();
        let result = match &pending {
            Pending::Replace(buf) => chunks.write(&key, Bytes::copy_from_slice(buf)).await,
            Pending::Append(buf) => chunks.append(&key, Bytes::copy_from_slice(buf)).await,
            Pending::Remove => chunks.delete(&key).await.map(|_| ()),
        };
        if let Err(err) = result {
            // keep the work so a later save can retry
            self.pending = Some(pending);
            return Err(err.into());
        }
        tracing::debug!(file_key = %key, "Flushed file column");
        Ok(())
    }

    fn on_delete(&mut self) -> FilesResult<Option<FileKey>> {
        self.pending = None;
        self.key()
    }
}

impl std::fmt::Debug for FileColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileColumn")
            .field("table", &self.table)
            .field("column", &self.column)
            .field("pk", &self.pk)
            .field("pending", &self.pending)
            .finish()
    }
}
