//! Shard metadata format for the XET object engine.
//!
//! A shard is the binary metadata object that ties the store together: it
//! records how files reconstruct from xorb chunk ranges (file-info section)
//! and which chunks each xorb holds (CAS-info section). Shards exist in two
//! forms:
//!
//! - **upload form** — header, the two sections with their bookends, no
//!   footer. This is what clients POST after uploading xorbs.
//! - **stored form** — adds three sorted lookup tables and a 200-byte
//!   footer. This is what the store persists and what dedup queries return.
//!
//! All multi-byte integers are little-endian. Every fixed record in the
//! sections is 48 bytes, which keeps the parser a sequence of fixed-width
//! reads.

mod builder;
mod codec;
mod error;
mod lookup;
mod structures;

pub use builder::ShardBuilder;
pub use codec::{parse_shard, serialize_shard_stored, serialize_shard_upload};
pub use error::ShardError;
pub use lookup::{CasLookupEntry, ChunkLookupEntry, FileLookupEntry, ShardLookups};
pub use structures::{
    CasBlock, CasChunkEntry, FileBlock, FileDataEntry, Shard, ShardFooter,
};
