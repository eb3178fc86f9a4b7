//! Error types for xorb serialization and parsing.

use xet_types::XetHash;

/// Errors that can occur while building, serializing, or parsing a xorb.
#[derive(Debug, thiserror::Error)]
pub enum XorbError {
    /// Chunk header carries an unknown format version.
    #[error("unknown chunk header version {0}")]
    UnknownChunkVersion(u8),

    /// Chunk header carries an unknown compression scheme tag.
    #[error("unknown compression scheme {0}")]
    UnknownCompressionScheme(u8),

    /// A size field in a chunk header is zero or exceeds its bound.
    #[error("invalid chunk size field: {field} = {value}")]
    InvalidChunkSize {
        /// Which header field was out of bounds.
        field: &'static str,
        /// The rejected value.
        value: u64,
    },

    /// The serialized data ended before a complete header or payload.
    #[error("truncated xorb data at offset {0}")]
    Truncated(usize),

    /// The footer ident bytes did not match the expected tag.
    #[error("bad footer ident {found:?}, expected {expected:?}")]
    BadFooterIdent {
        /// The ident that was read.
        found: [u8; 7],
        /// The ident that was expected at this position.
        expected: [u8; 7],
    },

    /// A footer section carries an unknown version.
    #[error("unknown footer section version {found} for {section}")]
    UnknownFooterVersion {
        /// Which footer section was being parsed.
        section: &'static str,
        /// The version that was read.
        found: u8,
    },

    /// Footer fields are inconsistent with each other or the chunk region.
    #[error("inconsistent footer: {0}")]
    InconsistentFooter(&'static str),

    /// Decompressed payload length disagrees with the header.
    #[error("chunk {index}: decompressed {actual} bytes, header says {expected}")]
    LengthMismatch {
        /// Index of the offending chunk.
        index: usize,
        /// Bytes actually produced.
        actual: usize,
        /// Bytes the header promised.
        expected: usize,
    },

    /// The recomputed xorb hash disagrees with the footer.
    #[error("xorb hash mismatch: computed {computed}, footer has {stored}")]
    HashMismatch {
        /// Hash recomputed from chunk contents.
        computed: XetHash,
        /// Hash recorded in the footer.
        stored: XetHash,
    },

    /// Builder limits would be exceeded.
    #[error("xorb full: {0}")]
    XorbFull(&'static str),

    /// The same chunk hash was added to one xorb twice.
    #[error("duplicate chunk {0} in xorb")]
    DuplicateChunk(XetHash),

    /// LZ4 frame decompression failed.
    #[error("lz4 decompression error: {0}")]
    Lz4(String),
}
