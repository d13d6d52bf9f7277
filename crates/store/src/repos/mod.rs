//! Repository traits for table operations.

pub mod chunks;
pub mod records;

pub use chunks::ChunkRepo;
pub use records::RecordRepo;
