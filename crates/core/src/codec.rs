//! Chunk splitting and reassembly.
//!
//! A file is stored as an ordered run of chunks, each at most `chunk_size`
//! bytes. Sequence numbers start at 0 and are contiguous. An empty payload is
//! stored as a single zero-length chunk at sequence 0 so that an empty file
//! can be told apart from a missing one.

use bytes::{Bytes, BytesMut};
use std::fmt;

use crate::{Error, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, Result};

/// One fragment of a file together with its position.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position within the file (0-indexed).
    pub sequence: u32,
    /// The chunk bytes.
    pub payload: Bytes,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(sequence: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    /// Get the chunk size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("sequence", &self.sequence)
            .field("size", &self.payload.len())
            .finish()
    }
}

/// Splits payloads into chunks of a fixed maximum size and joins them back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkCodec {
    chunk_size: usize,
}

impl ChunkCodec {
    /// Create a codec, validating the chunk size.
    pub fn new(chunk_size: usize) -> Result<Self> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(Error::InvalidChunkSize {
                size: chunk_size,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            });
        }
        Ok(Self { chunk_size })
    }

    /// Get the configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split a payload into chunks numbered from 0.
    pub fn split(&self, payload: &Bytes) -> Vec<Chunk> {
        self.split_from(payload, 0)
    }

    /// Split a payload into chunks numbered from `first_sequence`.
    ///
    /// Used for appends, where the new chunks continue an existing run. An
    /// empty payload yields the single empty chunk only when starting a file;
    /// appending nothing yields no chunks.
    pub fn split_from(&self, payload: &Bytes, first_sequence: u32) -> Vec<Chunk> {
        if payload.is_empty() {
            return if first_sequence == 0 {
                vec![Chunk::new(0, Bytes::new())]
            } else {
                Vec::new()
            };
        }

        let mut chunks = Vec::with_capacity(payload.len().div_ceil(self.chunk_size));
        let mut offset = 0;
        let mut sequence = first_sequence;
        while offset < payload.len() {
            let end = (offset + self.chunk_size).min(payload.len());
            // Bytes::slice shares the underlying buffer
            chunks.push(Chunk::new(sequence, payload.slice(offset..end)));
            offset = end;
            sequence += 1;
        }
        chunks
    }

    /// Number of chunks `split` would produce for a payload of `len` bytes.
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size).max(1)
    }
}

/// Concatenate chunks that are already in sequence order.
pub fn join(chunks: &[Chunk]) -> Bytes {
    match chunks {
        [] => Bytes::new(),
        [single] => single.payload.clone(),
        _ => {
            let total = chunks.iter().map(Chunk::size).sum();
            let mut out = BytesMut::with_capacity(total);
            for chunk in chunks {
                out.extend_from_slice(&chunk.payload);
            }
            out.freeze()
        }
    }
}

/// Sort chunks by sequence, check they form a contiguous run starting at
/// `first_sequence`, and concatenate them.
///
/// Storage does not guarantee row order, and parallel fetches complete in any
/// order, so every reassembly goes through here.
pub fn join_sequenced(mut chunks: Vec<Chunk>, first_sequence: u32) -> Result<Bytes> {
    chunks.sort_unstable_by_key(|c| c.sequence);
    check_contiguous(&chunks, first_sequence)?;
    Ok(join(&chunks))
}

/// Check that sorted chunks are numbered `first_sequence, first_sequence + 1, ...`.
pub fn check_contiguous(chunks: &[Chunk], first_sequence: u32) -> Result<()> {
    let mut expected = first_sequence;
    for chunk in chunks {
        if chunk.sequence != expected {
            return Err(Error::SequenceGap {
                expected,
                actual: chunk.sequence,
            });
        }
        expected += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(size: usize) -> ChunkCodec {
        ChunkCodec::new(size).unwrap()
    }

    #[test]
    fn test_split_ten_bytes_by_four() {
        let chunks = codec(4).split(&Bytes::from_static(b"abcdefghij"));
        let payloads: Vec<&[u8]> = chunks.iter().map(|c| c.payload.as_ref()).collect();
        assert_eq!(payloads, vec![&b"abcd"[..], &b"efgh"[..], &b"ij"[..]]);
        let sequences: Vec<u32> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(join(&chunks), Bytes::from_static(b"abcdefghij"));
    }

    #[test]
    fn test_empty_payload_is_single_empty_chunk() {
        let chunks = codec(4).split(&Bytes::new());
        assert_eq!(chunks, vec![Chunk::new(0, Bytes::new())]);
        assert!(join(&chunks).is_empty());
    }

    #[test]
    fn test_append_of_nothing_adds_no_chunks() {
        assert!(codec(4).split_from(&Bytes::new(), 3).is_empty());
    }

    #[test]
    fn test_split_from_continues_numbering() {
        let chunks = codec(2).split_from(&Bytes::from_static(b"xyz"), 5);
        let sequences: Vec<u32> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![5, 6]);
    }

    #[test]
    fn test_round_trip_various_sizes() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let payload = Bytes::from(data);
        for size in [1, 3, 7, 64, 255, 256, 999, 1000, 1001, 4096] {
            let chunks = codec(size).split(&payload);
            assert!(chunks.iter().all(|c| c.size() <= size));
            assert_eq!(chunks.len(), codec(size).chunk_count(payload.len()));
            assert_eq!(join(&chunks), payload, "chunk size {size}");
        }
    }

    #[test]
    fn test_round_trip_with_nul_bytes() {
        let payload = Bytes::from_static(b"\0\0a\0b\0\0\0");
        let chunks = codec(3).split(&payload);
        assert_eq!(join(&chunks), payload);
    }

    #[test]
    fn test_join_sequenced_sorts() {
        let mut chunks = codec(4).split(&Bytes::from_static(b"abcdefghij"));
        chunks.reverse();
        let joined = join_sequenced(chunks, 0).unwrap();
        assert_eq!(joined, Bytes::from_static(b"abcdefghij"));
    }

    #[test]
    fn test_join_sequenced_rejects_gap() {
        let chunks = vec![Chunk::new(0, &b"ab"[..]), Chunk::new(2, &b"cd"[..])];
        let err = join_sequenced(chunks, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::SequenceGap {
                expected: 1,
                actual: 2
            }
        ));
        assert!(err.is_integrity());
    }

    #[test]
    fn test_join_sequenced_rejects_duplicate() {
        let chunks = vec![Chunk::new(0, &b"ab"[..]), Chunk::new(0, &b"ab"[..])];
        assert!(join_sequenced(chunks, 0).is_err());
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(matches!(
            ChunkCodec::new(0),
            Err(Error::InvalidChunkSize { size: 0, .. })
        ));
        assert!(ChunkCodec::new(MAX_CHUNK_SIZE + 1).is_err());
    }
}
