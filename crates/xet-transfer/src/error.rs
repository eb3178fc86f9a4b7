//! Error types for the transfer engine.

use xet_types::XetHash;

/// Errors surfaced by a [`CasTransport`](crate::CasTransport) implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication or authorization failed; not retried automatically.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The endpoint rejected the request as malformed.
    #[error("rejected by endpoint: {0}")]
    Rejected(String),

    /// A network-level failure after the transport's own retries.
    #[error("network error: {0}")]
    Network(String),
}

/// Errors that can occur during upload or download.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Transport operation failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Chunking failed.
    #[error("chunk error: {0}")]
    Chunk(#[from] xet_chunk::ChunkError),

    /// Xorb serialization or parsing failed.
    #[error("xorb error: {0}")]
    Xorb(#[from] xet_xorb::XorbError),

    /// Shard serialization or parsing failed.
    #[error("shard error: {0}")]
    Shard(#[from] xet_shard::ShardError),

    /// The reconstruction response carried no fetch info for a xorb.
    #[error("no fetch info for xorb {0}")]
    MissingFetchInfo(XetHash),

    /// A term's chunk range is not covered by any fetch descriptor.
    #[error("no fetch descriptor covers chunks [{start}, {end}) of xorb {xorb}")]
    UncoveredTerm {
        /// The xorb the term refers to.
        xorb: XetHash,
        /// First chunk index of the term.
        start: u32,
        /// End chunk index, exclusive.
        end: u32,
    },

    /// A term produced fewer bytes than its declared unpacked length.
    #[error("term for xorb {xorb} produced {actual} bytes, expected {expected}")]
    TermLengthMismatch {
        /// The xorb the term refers to.
        xorb: XetHash,
        /// Bytes actually produced.
        actual: u64,
        /// Bytes the term declared.
        expected: u64,
    },

    /// The caller asked for a byte range with inverted bounds.
    #[error("invalid byte range: start {start} > end {end}")]
    InvalidRange {
        /// Requested first byte offset.
        start: u64,
        /// Requested last byte offset (inclusive).
        end: u64,
    },

    /// A spawned upload task panicked or was cancelled.
    #[error("upload task failed: {0}")]
    TaskFailed(String),

    /// A chunk reached shard formation without a xorb location.
    #[error("chunk {0} has no assigned location")]
    UnplacedChunk(XetHash),
}
