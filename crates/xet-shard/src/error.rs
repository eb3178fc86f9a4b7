//! Error types for shard serialization and parsing.

/// Errors that can occur while serializing or parsing a shard.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// The 17-byte magic sequence in the header tag did not match.
    #[error("bad shard magic sequence")]
    BadMagic,

    /// The application id in the header tag did not match.
    #[error("unexpected shard application id {0:?}")]
    BadApplicationId([u8; 14]),

    /// The header carries an unsupported format version.
    #[error("unsupported shard header version {0}")]
    UnsupportedHeaderVersion(u64),

    /// The footer carries an unsupported format version.
    #[error("unsupported shard footer version {0}")]
    UnsupportedFooterVersion(u64),

    /// The header's footer size is neither zero nor the footer length.
    #[error("invalid footer size {0}")]
    InvalidFooterSize(u64),

    /// The data ended before a complete record.
    #[error("truncated shard data at offset {0}")]
    Truncated(usize),

    /// A section was not terminated by its bookend.
    #[error("missing bookend after {0} section")]
    MissingBookend(&'static str),

    /// A footer offset or count points outside the shard.
    #[error("inconsistent footer: {0}")]
    InconsistentFooter(&'static str),

    /// Stored-form serialization was requested without footer metadata.
    #[error("shard has no footer metadata")]
    MissingFooter,

    /// A term's chunk indices are empty or reversed.
    #[error("invalid chunk range [{start}, {end}) in file entry")]
    InvalidChunkRange {
        /// First chunk index.
        start: u32,
        /// End chunk index, exclusive.
        end: u32,
    },
}
