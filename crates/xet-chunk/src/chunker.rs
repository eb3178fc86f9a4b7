//! Streaming gear-hash chunker.

use bytes::Bytes;
use gearhash::DEFAULT_TABLE;
use tokio::io::AsyncRead;
use xet_types::constants::{GEAR_MASK, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

use crate::error::ChunkError;

/// A single chunk of data with its offset in the original stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of this chunk within the input.
    pub offset: u64,
    /// The raw chunk bytes.
    pub data: Bytes,
}

impl Chunk {
    /// Length of the chunk in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk is empty (never true for emitted chunks).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Streaming content-defined chunker.
///
/// Feed data in with [`update`](Self::update), which returns every chunk
/// completed so far, then call [`finish`](Self::finish) for the trailing
/// tail. Boundaries fall where the gear rolling hash has its top 16 bits
/// clear, clamped to `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`; the tail may be
/// shorter than the minimum. A boundary resets the rolling hash, so chunk
/// hashes never depend on preceding chunks.
///
/// The boundary test is skipped while the current chunk is below the
/// minimum size, but the rolling hash is still updated on every byte —
/// both are required for boundaries to be reproducible.
pub struct GearChunker {
    hash: u64,
    pending: Vec<u8>,
    chunk_start: u64,
}

impl GearChunker {
    /// Create a chunker positioned at offset zero.
    pub fn new() -> Self {
        Self {
            hash: 0,
            pending: Vec::with_capacity(MAX_CHUNK_SIZE),
            chunk_start: 0,
        }
    }

    /// Feed `data` into the chunker, returning all chunks completed by it.
    pub fn update(&mut self, data: &[u8]) -> Vec<Chunk> {
        let mut out = Vec::new();

        for &byte in data {
            self.hash = (self.hash << 1).wrapping_add(DEFAULT_TABLE[byte as usize]);
            self.pending.push(byte);

            let size = self.pending.len();
            if size < MIN_CHUNK_SIZE {
                continue;
            }
            if size >= MAX_CHUNK_SIZE || self.hash & GEAR_MASK == 0 {
                out.push(self.take_pending());
            }
        }

        out
    }

    /// Emit the trailing chunk, if any data is pending.
    pub fn finish(&mut self) -> Option<Chunk> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_pending())
        }
    }

    fn take_pending(&mut self) -> Chunk {
        let data = std::mem::replace(&mut self.pending, Vec::with_capacity(MAX_CHUNK_SIZE));
        let offset = self.chunk_start;
        self.chunk_start += data.len() as u64;
        self.hash = 0;
        Chunk {
            offset,
            data: Bytes::from(data),
        }
    }

    /// Split a full in-memory buffer into chunks.
    ///
    /// Returns an empty vec for empty input; an input shorter than the
    /// minimum chunk size produces exactly one chunk.
    pub fn chunk(data: &[u8]) -> Vec<Chunk> {
        let mut chunker = Self::new();
        let mut chunks = chunker.update(data);
        chunks.extend(chunker.finish());
        chunks
    }

    /// Split data from an async reader into chunks.
    ///
    /// Reads the stream incrementally; memory use is bounded by the read
    /// buffer plus one maximum-size pending chunk.
    pub async fn chunk_stream(
        mut reader: impl AsyncRead + Unpin,
    ) -> Result<Vec<Chunk>, ChunkError> {
        use tokio::io::AsyncReadExt;

        let mut chunker = Self::new();
        let mut chunks = Vec::new();
        let mut buf = vec![0u8; 1024 * 1024];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            chunks.extend(chunker.update(&buf[..n]));
        }

        chunks.extend(chunker.finish());
        Ok(chunks)
    }
}

impl Default for GearChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random bytes (xorshift-free LCG).
    fn test_data(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut state: u32 = 0xDEAD_BEEF;
        for _ in 0..size {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            data.push((state >> 16) as u8);
        }
        data
    }

    #[test]
    fn test_empty_input_no_chunks() {
        assert!(GearChunker::chunk(b"").is_empty());
    }

    #[test]
    fn test_small_input_single_chunk() {
        let data = b"Hello World!";
        let chunks = GearChunker::chunk(data);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data.as_ref(), data);
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn test_input_below_min_single_chunk() {
        let data = test_data(MIN_CHUNK_SIZE - 1);
        let chunks = GearChunker::chunk(&data);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), data.len());
    }

    #[test]
    fn test_chunk_sizes_within_bounds() {
        let data = test_data(4 * 1024 * 1024);
        let chunks = GearChunker::chunk(&data);
        assert!(chunks.len() > 1, "4 MB should produce multiple chunks");

        for (i, chunk) in chunks.iter().enumerate() {
            if i < chunks.len() - 1 {
                assert!(
                    chunk.len() >= MIN_CHUNK_SIZE,
                    "chunk {i} size {} below minimum",
                    chunk.len()
                );
            }
            assert!(
                chunk.len() <= MAX_CHUNK_SIZE,
                "chunk {i} size {} above maximum",
                chunk.len()
            );
        }
    }

    #[test]
    fn test_boundaries_deterministic() {
        let data = test_data(1024 * 1024);
        let a = GearChunker::chunk(&data);
        let b = GearChunker::chunk(&data);
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunks_reassemble_input() {
        let data = test_data(777_777);
        let chunks = GearChunker::chunk(&data);

        let mut reassembled = Vec::with_capacity(data.len());
        let mut expected_offset = 0u64;
        for chunk in &chunks {
            assert_eq!(chunk.offset, expected_offset);
            expected_offset += chunk.len() as u64;
            reassembled.extend_from_slice(&chunk.data);
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_constant_data_hits_max_chunk_size() {
        // All-zero input never satisfies the gear mask, so every boundary
        // is forced at the maximum size.
        let data = vec![0u8; 3 * MAX_CHUNK_SIZE + 100];
        let chunks = GearChunker::chunk(&data);
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks[..3] {
            assert_eq!(chunk.len(), MAX_CHUNK_SIZE);
        }
        assert_eq!(chunks[3].len(), 100);
    }

    #[test]
    fn test_boundaries_shift_invariant_after_resync() {
        // Chunking the suffix of a file starting at a chunk boundary must
        // yield the same boundaries: the rolling hash resets per chunk.
        let data = test_data(2 * 1024 * 1024);
        let chunks = GearChunker::chunk(&data);
        assert!(chunks.len() > 2);

        let tail_start = chunks[1].offset as usize;
        let tail_chunks = GearChunker::chunk(&data[tail_start..]);
        assert_eq!(tail_chunks.len(), chunks.len() - 1);
        for (t, c) in tail_chunks.iter().zip(&chunks[1..]) {
            assert_eq!(t.data, c.data);
        }
    }

    #[test]
    fn test_incremental_update_matches_oneshot() {
        let data = test_data(1_500_000);
        let oneshot = GearChunker::chunk(&data);

        let mut chunker = GearChunker::new();
        let mut incremental = Vec::new();
        // Feed in awkward, non-aligned pieces.
        for piece in data.chunks(4097) {
            incremental.extend(chunker.update(piece));
        }
        incremental.extend(chunker.finish());

        assert_eq!(incremental, oneshot);
    }

    #[test]
    fn test_partial_modification_preserves_most_chunks() {
        let size = 2 * 1024 * 1024;
        let v1 = test_data(size);
        let mut v2 = v1.clone();
        for b in &mut v2[size - size / 20..] {
            *b = b.wrapping_add(1);
        }

        let chunks_v1: std::collections::HashSet<_> = GearChunker::chunk(&v1)
            .into_iter()
            .map(|c| c.data)
            .collect();
        let chunks_v2: Vec<_> = GearChunker::chunk(&v2);

        let shared = chunks_v2
            .iter()
            .filter(|c| chunks_v1.contains(&c.data))
            .count();
        let ratio = shared as f64 / chunks_v2.len() as f64;
        assert!(
            ratio > 0.80,
            "expected >80% chunk reuse, got {:.1}%",
            ratio * 100.0
        );
    }

    #[tokio::test]
    async fn test_stream_matches_sync() {
        let data = test_data(900_000);
        let sync_chunks = GearChunker::chunk(&data);
        let stream_chunks = GearChunker::chunk_stream(std::io::Cursor::new(data.clone()))
            .await
            .unwrap();
        assert_eq!(stream_chunks, sync_chunks);
    }

    #[tokio::test]
    async fn test_stream_empty() {
        let chunks = GearChunker::chunk_stream(std::io::Cursor::new(Vec::new()))
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }
}
