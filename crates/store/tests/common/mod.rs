//! Common test utilities and fixtures.

pub mod backends;
pub mod mocks;

#[allow(unused_imports)]
pub use backends::*;
#[allow(unused_imports)]
pub use mocks::*;

use bytes::Bytes;
use rowgrid_core::FilesConfig;

/// Deterministic pseudo-random payload of `len` bytes.
#[allow(dead_code)]
pub fn seeded_bytes(len: usize, seed: u8) -> Bytes {
    let mut state = u32::from(seed).wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Every byte value once, NUL included.
#[allow(dead_code)]
pub fn all_byte_values() -> Bytes {
    (0..=255u8).collect()
}

/// Small chunks so tests produce many rows cheaply.
#[allow(dead_code)]
pub fn small_chunks(chunk_size: usize) -> FilesConfig {
    FilesConfig {
        chunk_size,
        read_concurrency: 8,
        parallel_read_threshold: 32,
        read_batch_size: 10,
    }
}

/// Route `tracing` output to the test harness (`RUST_LOG=rowgrid_store=debug`).
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
