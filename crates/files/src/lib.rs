//! File storage over database rows for rowgrid.
//!
//! Files are kept as ordered chunk rows in the database that already holds
//! the application's records. This crate is the application-facing layer:
//! - [`Files`]: put/get/read/write/list/find/remove by key
//! - [`FileHandle`]: buffered file-like access to one key
//! - [`Model`] and [`Record`]: explicit schemas whose file columns
//!   ([`FileColumn`]) store content as chunks
//! - [`Registry`]: database handles by alias and the ambient default

pub mod api;
pub mod column;
pub mod error;
pub mod handle;
pub mod model;
pub mod registry;

pub use api::Files;
pub use column::{FileColumn, RecordHook};
pub use error::{FilesError, FilesResult};
pub use handle::{FileHandle, OpenMode};
pub use model::{Model, Record};
pub use registry::{DEFAULT_ALIAS, Database, Registry, UsingGuard};

pub use rowgrid_core::{ColumnKind, ColumnSpec, FileKey, ModelSchema, Value, Values};
pub use rowgrid_store::FileInfo;
