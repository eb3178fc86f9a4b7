//! Incremental xorb assembly.

use bytes::Bytes;
use tracing::debug;
use xet_types::constants::{MAX_XORB_CHUNKS, MAX_XORB_SIZE};
use xet_types::XetHash;

use crate::compression::CompressionScheme;
use crate::error::XorbError;
use crate::format::{serialize_xorb, CasObjectInfo, XorbChunk};

/// A finished xorb ready for upload.
#[derive(Debug, Clone)]
pub struct BuiltXorb {
    /// Aggregated hash identifying the xorb.
    pub hash: XetHash,
    /// The serialized blob, footer included.
    pub data: Bytes,
    /// Footer metadata (chunk hashes, sizes, boundaries).
    pub info: CasObjectInfo,
}

impl BuiltXorb {
    /// Total uncompressed bytes across all chunks.
    pub fn unpacked_len(&self) -> u32 {
        *self.info.unpacked_boundaries.last().expect("xorb is non-empty")
    }
}

/// Accumulates chunks into a xorb, stopping before either limit.
///
/// The size accounting is conservative: each chunk is charged its raw
/// length plus the header, so the serialized blob can only come in at or
/// under the estimate regardless of how compression fares.
pub struct XorbBuilder {
    chunks: Vec<XorbChunk>,
    seen: std::collections::HashSet<XetHash>,
    scheme: CompressionScheme,
    estimated_size: usize,
}

impl XorbBuilder {
    /// Create a builder that compresses chunks under `scheme`.
    pub fn new(scheme: CompressionScheme) -> Self {
        Self {
            chunks: Vec::new(),
            seen: std::collections::HashSet::new(),
            scheme,
            estimated_size: 0,
        }
    }

    /// Whether a chunk of `len` bytes fits without exceeding limits.
    pub fn can_add(&self, len: usize) -> bool {
        self.chunks.len() < MAX_XORB_CHUNKS
            && self.estimated_size + 8 + len <= MAX_XORB_SIZE
    }

    /// Add a chunk; the caller supplies the precomputed hash.
    ///
    /// Returns the chunk's index within the xorb. Fails if limits would be
    /// exceeded or if the same chunk hash is already present — a xorb never
    /// stores a chunk twice.
    pub fn add(&mut self, hash: XetHash, data: Bytes) -> Result<u32, XorbError> {
        if !self.can_add(data.len()) {
            return Err(XorbError::XorbFull("size or chunk count limit reached"));
        }
        if !self.seen.insert(hash) {
            return Err(XorbError::DuplicateChunk(hash));
        }

        self.estimated_size += 8 + data.len();
        self.chunks.push(XorbChunk {
            hash,
            data,
            scheme: self.scheme,
        });
        Ok(self.chunks.len() as u32 - 1)
    }

    /// Whether a chunk with this hash has already been added.
    pub fn contains(&self, hash: &XetHash) -> bool {
        self.seen.contains(hash)
    }

    /// Number of chunks added so far.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunks have been added.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Serialize the accumulated chunks, consuming the builder.
    pub fn build(self) -> Result<BuiltXorb, XorbError> {
        let (data, info) = serialize_xorb(&self.chunks)?;
        debug!(
            xorb_hash = %info.xorb_hash,
            num_chunks = info.num_chunks(),
            serialized = data.len(),
            "built xorb"
        );
        Ok(BuiltXorb {
            hash: info.xorb_hash,
            data,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::parse_xorb;

    fn data(i: u32, len: usize) -> Bytes {
        let mut v = Vec::with_capacity(len);
        let mut state = i.wrapping_mul(2654435761).wrapping_add(1);
        for _ in 0..len {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            v.push((state >> 16) as u8);
        }
        Bytes::from(v)
    }

    #[test]
    fn test_build_and_reparse() {
        let mut builder = XorbBuilder::new(CompressionScheme::Lz4);
        let mut payloads = Vec::new();
        for i in 0..5 {
            let d = data(i, 10_000);
            builder.add(xet_hash::chunk_hash(&d), d.clone()).unwrap();
            payloads.push(d);
        }

        let xorb = builder.build().unwrap();
        let parsed = parse_xorb(&xorb.data).unwrap();
        assert_eq!(parsed.info.xorb_hash, xorb.hash);
        assert_eq!(parsed.chunks, payloads);
    }

    #[test]
    fn test_add_returns_sequential_indices() {
        let mut builder = XorbBuilder::new(CompressionScheme::None);
        for i in 0..4 {
            let d = data(i, 100);
            let idx = builder.add(xet_hash::chunk_hash(&d), d).unwrap();
            assert_eq!(idx, i);
        }
    }

    #[test]
    fn test_rejects_duplicate_chunk() {
        let mut builder = XorbBuilder::new(CompressionScheme::None);
        let d = data(7, 100);
        let hash = xet_hash::chunk_hash(&d);
        builder.add(hash, d.clone()).unwrap();
        assert!(matches!(
            builder.add(hash, d),
            Err(XorbError::DuplicateChunk(_))
        ));
    }

    #[test]
    fn test_chunk_count_limit() {
        let mut builder = XorbBuilder::new(CompressionScheme::None);
        for i in 0..MAX_XORB_CHUNKS as u32 {
            // Distinct by construction so the duplicate check stays out of
            // the way.
            let d = Bytes::from(i.to_le_bytes().to_vec());
            builder.add(xet_hash::chunk_hash(&d), d).unwrap();
        }
        assert!(!builder.can_add(1));
        let d = Bytes::from(u64::MAX.to_le_bytes().to_vec());
        assert!(matches!(
            builder.add(xet_hash::chunk_hash(&d), d),
            Err(XorbError::XorbFull(_))
        ));
    }

    #[test]
    fn test_unpacked_len() {
        let mut builder = XorbBuilder::new(CompressionScheme::None);
        builder.add(xet_hash::chunk_hash(b"abc"), Bytes::from_static(b"abc")).unwrap();
        builder.add(xet_hash::chunk_hash(b"defgh"), Bytes::from_static(b"defgh")).unwrap();
        let xorb = builder.build().unwrap();
        assert_eq!(xorb.unpacked_len(), 8);
    }

    #[test]
    fn test_empty_builder_fails_build() {
        assert!(XorbBuilder::new(CompressionScheme::None).build().is_err());
    }

    #[test]
    fn test_serialized_size_within_estimate() {
        let mut builder = XorbBuilder::new(CompressionScheme::Lz4);
        let mut estimate = 0;
        for i in 0..20 {
            let d = data(i, 5000);
            estimate += 8 + d.len();
            builder.add(xet_hash::chunk_hash(&d), d).unwrap();
        }
        let xorb = builder.build().unwrap();
        let region_len = *xorb.info.chunk_boundaries.last().unwrap() as usize;
        assert!(region_len <= estimate);
    }
}
