//! Content-defined chunking for the XET object engine.
//!
//! This crate provides [`GearChunker`] — a streaming splitter whose chunk
//! boundaries are determined by a gear rolling hash over the content.
//! Identical data always produces identical boundaries, which is what makes
//! chunk-level deduplication work across files, versions, and repositories.
//!
//! **Parameters are fixed at deployment and must never change**, otherwise
//! deduplication breaks (same data would produce different chunk boundaries).

mod chunker;
mod error;

pub use chunker::{Chunk, GearChunker};
pub use error::ChunkError;
