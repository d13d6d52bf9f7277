//! Buffered file handles.

use std::fmt;
use std::io::SeekFrom;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use rowgrid_core::FileKey;
use rowgrid_store::{ChunkStore, ChunkStream};

use crate::error::{FilesError, FilesResult};

/// How a [`FileHandle`] was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Replace the file on the first flush, append on later ones.
    Write,
    Append,
}

impl OpenMode {
    pub fn is_read(self) -> bool {
        self == OpenMode::Read
    }
}

impl FromStr for OpenMode {
    type Err = FilesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" | "rb" => Ok(Self::Read),
            "w" | "wb" => Ok(Self::Write),
            "a" | "ab" => Ok(Self::Append),
            other => Err(FilesError::Validation(format!(
                "unsupported open mode '{other}' (expected r, w or a)"
            ))),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "r",
            Self::Write => "w",
            Self::Append => "a",
        })
    }
}

/// File-like access to one stored file.
///
/// Read handles load the whole file on first use and serve reads from
/// memory. Write and append handles buffer everything until [`flush`] or
/// [`close`]; nothing is written implicitly, so a handle dropped with
/// buffered data loses it.
///
/// [`flush`]: FileHandle::flush
/// [`close`]: FileHandle::close
pub struct FileHandle {
    key: FileKey,
    store: ChunkStore,
    mode: OpenMode,
    content: Option<Bytes>,
    position: usize,
    buffer: BytesMut,
    replace_pending: bool,
    closed: bool,
}

impl FileHandle {
    /// Open `key` in `mode`. Read mode requires the file to exist.
    pub async fn open(store: ChunkStore, key: FileKey, mode: OpenMode) -> FilesResult<Self> {
        if mode.is_read() && !store.exists(&key).await? {
            return Err(FilesError::NotFound(key.to_string()));
        }
        tracing::debug!(file_key = %key, mode = %mode, "Opened file handle");
        Ok(Self {
            key,
            store,
            mode,
            content: None,
            position: 0,
            buffer: BytesMut::new(),
            replace_pending: mode == OpenMode::Write,
            closed: false,
        })
    }

    pub fn key(&self) -> &FileKey {
        &self.key
    }

    /// The file key as a string.
    pub fn name(&self) -> &str {
        self.key.as_str()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes buffered but not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn ensure_open(&self) -> FilesResult<()> {
        if self.closed {
            return Err(FilesError::Validation(format!("{} is closed", self.key)));
        }
        Ok(())
    }

    fn ensure_readable(&self) -> FilesResult<()> {
        self.ensure_open()?;
        if !self.mode.is_read() {
            return Err(FilesError::Validation(format!(
                "{} is open for writing ({})",
                self.key, self.mode
            )));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> FilesResult<()> {
        self.ensure_open()?;
        if self.mode.is_read() {
            return Err(FilesError::Validation(format!(
                "{} is open for reading",
                self.key
            )));
        }
        Ok(())
    }

    async fn load(&mut self) -> FilesResult<&Bytes> {
        let content = match self.content.take() {
            Some(content) => content,
            None => self.store.fetch(&self.key).await?,
        };
        Ok(self.content.insert(content))
    }

    /// Read up to `size` bytes from the cursor, or everything left when
    /// `size` is `None`. Returns an empty buffer at end of file.
    pub async fn read(&mut self, size: Option<usize>) -> FilesResult<Bytes> {
        self.ensure_readable()?;
        let position = self.position;
        let content = self.load().await?;
        let start = position.min(content.len());
        let end = match size {
            Some(size) => start.saturating_add(size).min(content.len()),
            None => content.len(),
        };
        let out = content.slice(start..end);
        self.position = end.max(position);
        Ok(out)
    }

    /// Read through the next `\n` (inclusive), or to end of file.
    pub async fn readline(&mut self) -> FilesResult<Bytes> {
        self.ensure_readable()?;
        let position = self.position;
        let content = self.load().await?;
        let start = position.min(content.len());
        let end = content[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(content.len(), |i| start + i + 1);
        let out = content.slice(start..end);
        self.position = end.max(position);
        Ok(out)
    }

    /// Move the read cursor. Positions past the end are allowed; reads
    /// there return nothing.
    pub async fn seek(&mut self, pos: SeekFrom) -> FilesResult<u64> {
        self.ensure_readable()?;
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => self.position as i128 + i128::from(delta),
            SeekFrom::End(delta) => self.load().await?.len() as i128 + i128::from(delta),
        };
        let position = usize::try_from(target).map_err(|_| {
            FilesError::Validation(format!("invalid seek to {target} in {}", self.key))
        })?;
        self.position = position;
        Ok(position as u64)
    }

    /// Current read cursor.
    pub fn tell(&self) -> u64 {
        self.position as u64
    }

    /// Size of the file as this handle sees it, including unflushed data.
    pub async fn size(&mut self) -> FilesResult<u64> {
        if let Some(content) = &self.content {
            return Ok(content.len() as u64);
        }
        let pending = self.buffer.len() as u64;
        if self.replace_pending {
            return Ok(pending);
        }
        let stored = self.store.stat(&self.key).await?.map_or(0, |info| info.size);
        Ok(stored + pending)
    }

    /// Stream the stored chunks without loading the whole file.
    pub fn read_chunks(&self) -> FilesResult<ChunkStream> {
        self.ensure_readable()?;
        Ok(self.store.read_chunks(&self.key))
    }

    /// Buffer `data`. Returns the number of bytes accepted.
    pub fn write(&mut self, data: &[u8]) -> FilesResult<usize> {
        self.ensure_writable()?;
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }

    /// Discard buffered data; the next flush replaces the file with
    /// whatever is written after this call.
    pub fn truncate(&mut self) -> FilesResult<()> {
        self.ensure_writable()?;
        self.buffer.clear();
        self.replace_pending = true;
        Ok(())
    }

    /// Write buffered data to the database.
    ///
    /// On failure the buffer is kept so the flush can be retried.
    pub async fn flush(&mut self) -> FilesResult<()> {
        if self.mode.is_read() || self.closed {
            return Ok(());
        }
        if !self.replace_pending && self.buffer.is_empty() {
            return Ok(());
        }

        let data = self.buffer.split().freeze();
        let result = if self.replace_pending {
            self.store.write(&self.key, data.clone()).await
        } else {
            self.store.append(&self.key, data.clone()).await
        };

        match result {
            Ok(()) => {
                self.replace_pending = false;
                Ok(())
            }
            Err(err) => {
                let mut restored = BytesMut::from(&data[..]);
                restored.extend_from_slice(&self.buffer);
                self.buffer = restored;
                Err(err.into())
            }
        }
    }

    /// Flush and close. Closing twice is a no-op.
    pub async fn close(&mut self) -> FilesResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush().await?;
        self.closed = true;
        self.content = None;
        Ok(())
    }

    /// Delete the file and discard the handle.
    pub async fn remove(mut self) -> FilesResult<()> {
        self.buffer.clear();
        self.replace_pending = false;
        self.closed = true;
        self.store.delete(&self.key).await?;
        Ok(())
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("position", &self.position)
            .field("pending", &self.buffer.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.closed && !self.buffer.is_empty() {
            tracing::warn!(
                file_key = %self.key,
                pending = self.buffer.len(),
                "FileHandle dropped with unflushed data; call close() to persist it"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_parse() {
        assert_eq!("rb".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("w".parse::<OpenMode>().unwrap(), OpenMode::Write);
        assert_eq!("ab".parse::<OpenMode>().unwrap(), OpenMode::Append);
        assert!("x".parse::<OpenMode>().unwrap_err().is_validation());
        assert_eq!(OpenMode::Append.to_string(), "a");
    }
}
