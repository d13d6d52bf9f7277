//! File key types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, MAX_FILE_KEY_LEN, Result};

/// The identifier under which a file's chunks are grouped.
///
/// Keys are unique per database handle, non-empty, at most 255 bytes and
/// free of NUL characters.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileKey(String);

impl FileKey {
    /// Create from a string, validating format.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidKey("file key must not be empty".to_string()));
        }
        if key.len() > MAX_FILE_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "file key must be at most {MAX_FILE_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        if key.contains('\0') {
            return Err(Error::InvalidKey(
                "file key must not contain NUL".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Generate a random key (32 lowercase hex digits).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Derive the key for a file column of a stored record.
    ///
    /// The same table, primary key and column always yield the same key.
    pub fn for_column(table: &str, primary_key: i64, column: &str) -> Result<Self> {
        Self::new(format!("{table}/{primary_key}/{column}"))
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileKey({})", self.0)
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FileKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for FileKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FileKey> for String {
    fn from(key: FileKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert_eq!(FileKey::new("testfile").unwrap().as_str(), "testfile");
        assert!(FileKey::new("a/b/c.bin").is_ok());
        assert!(FileKey::new("x".repeat(MAX_FILE_KEY_LEN)).is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(FileKey::new("").is_err());
        assert!(FileKey::new("x".repeat(MAX_FILE_KEY_LEN + 1)).is_err());
        assert!(FileKey::new("a\0b").is_err());
    }

    #[test]
    fn test_generated_keys_are_hex_and_distinct() {
        let a = FileKey::generate();
        let b = FileKey::generate();
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_column_key_is_deterministic() {
        let a = FileKey::for_column("image", 7, "imagefile").unwrap();
        let b = FileKey::for_column("image", 7, "imagefile").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "image/7/imagefile");
        assert_ne!(a, FileKey::for_column("image", 8, "imagefile").unwrap());
    }

    #[test]
    fn test_serde_validates() {
        let key: FileKey = serde_json::from_str("\"foo\"").unwrap();
        assert_eq!(key.as_str(), "foo");
        assert!(serde_json::from_str::<FileKey>("\"\"").is_err());
    }
}
