//! Core domain types and shared logic for rowgrid.
//!
//! This crate defines the pieces every other crate builds on:
//! - Chunk splitting and reassembly (the chunk codec)
//! - File keys and glob patterns over them
//! - Configuration for database handles and file chunking
//! - Explicit model schema descriptions and column values

pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod pattern;
pub mod schema;
pub mod value;

pub use codec::{Chunk, ChunkCodec};
pub use config::{Config, DatabaseConfig, FilesConfig};
pub use error::{Error, Result};
pub use key::FileKey;
pub use pattern::KeyPattern;
pub use schema::{ColumnKind, ColumnSpec, ModelSchema};
pub use value::{Value, Values};

/// Default chunk size: 256 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Maximum chunk size: 64 MiB
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Minimum chunk size: 1 byte
pub const MIN_CHUNK_SIZE: usize = 1;

/// Maximum length of a file key in bytes.
pub const MAX_FILE_KEY_LEN: usize = 255;
