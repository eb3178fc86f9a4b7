//! The reconstruction engine: terms plus ranged fetches → file bytes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};
use xet_types::reconstruction::{FetchInfo, HttpByteRange, ReconstructionTerm};
use xet_types::XetHash;
use xet_xorb::extract_chunk_range;

use crate::cache::ChunkCache;
use crate::error::TransferError;
use crate::transport::CasTransport;

/// Default budget for the decompressed-chunk cache: 64 MB.
const DEFAULT_CACHE_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Reconstructs files (or byte ranges of files) from a CAS endpoint.
///
/// For each term the engine fetches the covering xorb byte range, walks the
/// chunk headers, and decompresses the term's chunks. Terms sharing a xorb
/// share one fetch per descriptor within a download, and decompressed
/// chunks land in a cache keyed by their chunk hash. Terms don't name
/// chunk hashes, so the session also remembers which hash lives at each
/// `(xorb, chunk index)` it has decompressed; a later download whose term
/// is fully cached is served from memory without fetching at all.
pub struct DownloadSession {
    transport: Arc<dyn CasTransport>,
    cache: ChunkCache,
    /// (xorb, chunk index) → chunk hash, learned on first decompression.
    chunk_ids: Mutex<HashMap<(XetHash, u32), XetHash>>,
}

impl DownloadSession {
    /// Create a session over the given transport with the default cache.
    pub fn new(transport: Arc<dyn CasTransport>) -> Self {
        Self::with_cache_size(transport, DEFAULT_CACHE_MAX_BYTES)
    }

    /// Create a session with an explicit chunk cache budget.
    pub fn with_cache_size(transport: Arc<dyn CasTransport>, cache_max_bytes: u64) -> Self {
        Self {
            transport,
            cache: ChunkCache::new(cache_max_bytes),
            chunk_ids: Mutex::new(HashMap::new()),
        }
    }

    /// The decompressed-chunk cache.
    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Download a whole file.
    pub async fn download(&self, file_hash: XetHash) -> Result<Bytes, TransferError> {
        self.download_inner(file_hash, None).await
    }

    /// Download a byte range of a file; `range` uses inclusive-end HTTP
    /// semantics, matching what the reconstruction endpoint expects.
    pub async fn download_range(
        &self,
        file_hash: XetHash,
        range: HttpByteRange,
    ) -> Result<Bytes, TransferError> {
        if range.is_empty() {
            return Err(TransferError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        self.download_inner(file_hash, Some(range)).await
    }

    async fn download_inner(
        &self,
        file_hash: XetHash,
        range: Option<HttpByteRange>,
    ) -> Result<Bytes, TransferError> {
        let response = self.transport.get_reconstruction(file_hash, range).await?;
        info!(
            %file_hash,
            terms = response.terms.len(),
            skip = response.offset_into_first_range,
            "reconstructing file"
        );

        // One fetch per (xorb, descriptor), shared across terms.
        let mut fetched: HashMap<(XetHash, u32), Bytes> = HashMap::new();
        let mut out = BytesMut::new();

        for (term_index, term) in response.terms.iter().enumerate() {
            let chunks = match self.cached_term(term) {
                Some(chunks) => {
                    debug!(xorb = %term.xorb_hash, "serving term from chunk cache");
                    chunks
                }
                None => self.fetch_term(&response.fetch_info, term, &mut fetched).await?,
            };

            let mut term_bytes = 0u64;
            for chunk in chunks {
                term_bytes += chunk.len() as u64;
                out.extend_from_slice(&chunk);
            }
            if term_bytes != term.unpacked_length as u64 {
                return Err(TransferError::TermLengthMismatch {
                    xorb: term.xorb_hash,
                    actual: term_bytes,
                    expected: term.unpacked_length as u64,
                });
            }

            // Range queries start mid-term: drop the lead-in once.
            if term_index == 0 && response.offset_into_first_range > 0 {
                let skip = (response.offset_into_first_range as usize).min(out.len());
                let _ = out.split_to(skip);
            }
        }

        // Truncate to the requested length; the last term may run past it.
        if let Some(range) = range {
            out.truncate(range.len() as usize);
        }

        Ok(out.freeze())
    }

    /// Serve a term entirely from the chunk cache, if every one of its
    /// chunks is known and still resident.
    fn cached_term(&self, term: &ReconstructionTerm) -> Option<Vec<Bytes>> {
        let ids = self.chunk_ids.lock().expect("chunk id lock poisoned");
        let mut chunks = Vec::with_capacity(term.chunk_range.len() as usize);
        for index in term.chunk_range.start..term.chunk_range.end {
            let hash = ids.get(&(term.xorb_hash, index))?;
            chunks.push(self.cache.get(hash)?);
        }
        Some(chunks)
    }

    /// Fetch and decompress a term's chunks, remembering each chunk's
    /// hash and caching its bytes for later downloads.
    async fn fetch_term(
        &self,
        fetch_info: &HashMap<XetHash, Vec<FetchInfo>>,
        term: &ReconstructionTerm,
        fetched: &mut HashMap<(XetHash, u32), Bytes>,
    ) -> Result<Vec<Bytes>, TransferError> {
        let descriptors = fetch_info
            .get(&term.xorb_hash)
            .ok_or(TransferError::MissingFetchInfo(term.xorb_hash))?;
        let descriptor = covering_descriptor(descriptors, term)?;

        let key = (term.xorb_hash, descriptor.chunk_range.start);
        let segment = match fetched.get(&key) {
            Some(segment) => segment.clone(),
            None => {
                let segment = self
                    .transport
                    .fetch_bytes(&descriptor.url, descriptor.url_range)
                    .await?;
                debug!(
                    xorb = %term.xorb_hash,
                    bytes = segment.len(),
                    "fetched xorb range"
                );
                fetched.insert(key, segment.clone());
                segment
            }
        };

        // Term indices are relative to the descriptor's first chunk.
        let relative_start = term.chunk_range.start - descriptor.chunk_range.start;
        let relative_end = term.chunk_range.end - descriptor.chunk_range.start;
        let chunks = extract_chunk_range(&segment, relative_start, relative_end)?;

        let mut ids = self.chunk_ids.lock().expect("chunk id lock poisoned");
        for (offset, chunk) in chunks.iter().enumerate() {
            let hash = xet_hash::chunk_hash(chunk);
            ids.insert((term.xorb_hash, term.chunk_range.start + offset as u32), hash);
            self.cache.put(hash, chunk.clone());
        }

        Ok(chunks)
    }
}

/// Find the fetch descriptor whose chunk range covers the term's.
fn covering_descriptor<'a>(
    descriptors: &'a [FetchInfo],
    term: &ReconstructionTerm,
) -> Result<&'a FetchInfo, TransferError> {
    descriptors
        .iter()
        .find(|d| {
            d.chunk_range.start <= term.chunk_range.start
                && term.chunk_range.end <= d.chunk_range.end
        })
        .ok_or(TransferError::UncoveredTerm {
            xorb: term.xorb_hash,
            start: term.chunk_range.start,
            end: term.chunk_range.end,
        })
}
