//! Error types for chunking operations.

/// Errors that can occur while chunking a stream.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// An I/O error occurred while reading the input stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
