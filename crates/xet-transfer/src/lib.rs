//! Upload and download engine for the XET object engine.
//!
//! This crate ties the leaf components together into the client data plane:
//!
//! - [`CasTransport`] — the async interface a CAS endpoint must provide.
//!   The engine never talks HTTP itself; it drives this trait.
//! - [`UploadSession`] — chunk → dedup → xorb formation → shard, with
//!   session-local and global deduplication.
//! - [`DownloadSession`] — reconstruction from terms and ranged xorb
//!   fetches, including byte-range queries.
//! - [`DedupIndex`] — cached dedup-response shards with keyed matching and
//!   expiry-driven eviction.
//! - [`InMemoryCas`] — a complete in-process transport used by tests.

mod cache;
mod dedup;
mod download;
mod error;
mod memory;
mod transport;
mod upload;

#[cfg(test)]
mod tests;

pub use cache::ChunkCache;
pub use dedup::{DedupIndex, RemoteChunk};
pub use download::DownloadSession;
pub use error::{TransferError, TransportError};
pub use memory::InMemoryCas;
pub use transport::{CasTransport, ShardRegistration};
pub use upload::{UploadConfig, UploadSession, UploadSummary};
