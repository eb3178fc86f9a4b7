//! Data types exchanged with a CAS endpoint when reconstructing a file.
//!
//! A reconstruction response lists the ordered [`ReconstructionTerm`]s that
//! rebuild a file, plus per-xorb [`FetchInfo`] describing where the backing
//! bytes live. Chunk ranges follow the project-wide `[start, end)` exclusive
//! convention; the byte range inside [`FetchInfo`] uses HTTP `Range` header
//! semantics with an *inclusive* end, and the two must never be mixed up.

use serde::{Deserialize, Serialize};

use crate::XetHash;

/// A half-open chunk index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    /// First chunk index, inclusive.
    pub start: u32,
    /// One past the last chunk index.
    pub end: u32,
}

impl ChunkRange {
    /// Create a new range; `end` is exclusive.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of chunks covered.
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range covers no chunks.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A byte range with an inclusive end, matching HTTP `Range` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpByteRange {
    /// First byte offset, inclusive.
    pub start: u64,
    /// Last byte offset, inclusive.
    pub end: u64,
}

impl HttpByteRange {
    /// Create a new inclusive-end byte range.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered; zero for an inverted range.
    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// Whether the range covers no bytes (inverted bounds).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// One contiguous slice of a file: a run of chunks within a single xorb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionTerm {
    /// Hash of the xorb holding the chunks.
    pub xorb_hash: XetHash,
    /// Total uncompressed bytes covered by the chunk range.
    pub unpacked_length: u32,
    /// Chunk indices within the xorb, end-exclusive.
    pub chunk_range: ChunkRange,
}

/// Where to fetch a span of a xorb's serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchInfo {
    /// Chunk indices within the xorb that the URL range covers.
    pub chunk_range: ChunkRange,
    /// Pre-signed or direct URL for the xorb data.
    pub url: String,
    /// Byte range of the serialized xorb to request (inclusive end).
    pub url_range: HttpByteRange,
}

/// Response to a reconstruction query for one file (or a byte range of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionResponse {
    /// Bytes to discard from the start of the first term's output.
    pub offset_into_first_range: u64,
    /// Ordered terms that concatenate into the requested data.
    pub terms: Vec<ReconstructionTerm>,
    /// Fetch descriptors per xorb, keyed by the xorb hash string form.
    pub fetch_info: std::collections::HashMap<XetHash, Vec<FetchInfo>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_range_len() {
        assert_eq!(ChunkRange::new(2, 7).len(), 5);
        assert_eq!(ChunkRange::new(3, 3).len(), 0);
        assert!(ChunkRange::new(3, 3).is_empty());
    }

    #[test]
    fn test_http_byte_range_len_is_inclusive() {
        assert_eq!(HttpByteRange::new(0, 0).len(), 1);
        assert_eq!(HttpByteRange::new(10, 19).len(), 10);
    }

    #[test]
    fn test_http_byte_range_inverted_is_empty() {
        let inverted = HttpByteRange::new(10, 5);
        assert!(inverted.is_empty());
        assert_eq!(inverted.len(), 0);
        assert!(!HttpByteRange::new(5, 5).is_empty());
    }

    #[test]
    fn test_response_serde_roundtrip() {
        let xorb = XetHash::from([3u8; 32]);
        let resp = ReconstructionResponse {
            offset_into_first_range: 12,
            terms: vec![ReconstructionTerm {
                xorb_hash: xorb,
                unpacked_length: 4096,
                chunk_range: ChunkRange::new(0, 2),
            }],
            fetch_info: std::collections::HashMap::from([(
                xorb,
                vec![FetchInfo {
                    chunk_range: ChunkRange::new(0, 2),
                    url: "https://cdn.example.com/xorb".to_string(),
                    url_range: HttpByteRange::new(0, 4211),
                }],
            )]),
        };

        let json = serde_json::to_string(&resp).unwrap();
        let back: ReconstructionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }
}
