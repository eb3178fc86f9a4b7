//! Xorb container format for the XET object engine.
//!
//! A xorb aggregates up to 8192 compressed chunks into one immutable blob:
//! a chunk region (8-byte header plus payload per chunk), a self-describing
//! [`CasObjectInfo`] footer carrying the xorb hash, per-chunk hashes, and
//! boundary offsets, and a trailing u32 with the footer length.
//!
//! This crate provides:
//! - [`CompressionScheme`] — the three chunk payload codecs,
//! - [`serialize_xorb`] / [`parse_xorb`] / [`extract_chunk_range`] — the
//!   binary codec,
//! - [`XorbBuilder`] — incremental assembly with size and count limits.

mod builder;
mod compression;
mod error;
mod format;

pub use builder::{BuiltXorb, XorbBuilder};
pub use compression::{byte_group_4, byte_ungroup_4, CompressionScheme};
pub use error::XorbError;
pub use format::{
    extract_chunk_range, parse_xorb, serialize_xorb, CasObjectInfo, ParsedXorb, XorbChunk,
};
