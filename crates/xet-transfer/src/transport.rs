//! The transport interface the engine drives.

use bytes::Bytes;
use xet_types::reconstruction::{HttpByteRange, ReconstructionResponse};
use xet_types::XetHash;

use crate::error::TransportError;

/// Outcome of registering a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRegistration {
    /// The shard's contents were already known to the endpoint.
    AlreadyExisted,
    /// The shard was registered.
    Registered,
}

/// Async interface to a CAS endpoint.
///
/// Implementations own everything network-shaped: authentication, retry
/// with backoff on transient failures, pre-signed URL handling. The engine
/// treats an error from any method as final for the operation.
///
/// All implementations must be `Send + Sync`; sessions drive uploads from
/// multiple tasks concurrently.
#[async_trait::async_trait]
pub trait CasTransport: Send + Sync {
    /// Fetch the reconstruction description of a file, optionally limited
    /// to a byte range (inclusive end, HTTP semantics).
    async fn get_reconstruction(
        &self,
        file_hash: XetHash,
        byte_range: Option<HttpByteRange>,
    ) -> Result<ReconstructionResponse, TransportError>;

    /// Query global deduplication for a chunk.
    ///
    /// Returns a serialized stored-form shard describing xorbs that contain
    /// the chunk, or `None` when the chunk is unknown.
    async fn query_dedup(
        &self,
        namespace: &str,
        chunk_hash: XetHash,
    ) -> Result<Option<Bytes>, TransportError>;

    /// Upload a serialized xorb. Returns `true` if the xorb was inserted,
    /// `false` if the endpoint already had it.
    async fn put_xorb(
        &self,
        namespace: &str,
        xorb_hash: XetHash,
        data: Bytes,
    ) -> Result<bool, TransportError>;

    /// Register an upload-form shard. Every xorb the shard references must
    /// already be uploaded.
    async fn put_shard(&self, shard: Bytes) -> Result<ShardRegistration, TransportError>;

    /// Fetch a byte range (inclusive end) from a URL out of a
    /// reconstruction response.
    async fn fetch_bytes(
        &self,
        url: &str,
        range: HttpByteRange,
    ) -> Result<Bytes, TransportError>;
}
