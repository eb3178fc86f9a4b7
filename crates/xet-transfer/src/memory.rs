//! In-process CAS endpoint backing unit and integration tests.
//!
//! Implements the full transport contract over hash maps: xorbs are
//! verified on upload, shards are validated against uploaded xorbs, dedup
//! queries answer with stored-form shards (optionally keyed), and
//! reconstruction responses carry `mem://` URLs that
//! [`fetch_bytes`](crate::CasTransport::fetch_bytes) resolves against the
//! stored blobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use tracing::debug;
use xet_hash::is_global_dedup_eligible;
use xet_shard::{parse_shard, serialize_shard_stored, CasBlock, FileBlock, ShardBuilder};
use xet_types::reconstruction::{
    ChunkRange, FetchInfo, HttpByteRange, ReconstructionResponse, ReconstructionTerm,
};
use xet_types::XetHash;
use xet_xorb::{parse_xorb, CasObjectInfo};

use crate::error::TransportError;
use crate::transport::{CasTransport, ShardRegistration};

struct StoredXorb {
    data: Bytes,
    info: CasObjectInfo,
}

#[derive(Default)]
struct CasState {
    xorbs: HashMap<XetHash, StoredXorb>,
    files: HashMap<XetHash, FileBlock>,
    cas_blocks: HashMap<XetHash, CasBlock>,
    /// Raw chunk hash → owning xorb, for dedup answers.
    chunk_index: HashMap<XetHash, XetHash>,
}

/// An in-memory CAS endpoint.
pub struct InMemoryCas {
    state: RwLock<CasState>,
    /// Key and expiry applied to dedup-response shards; `None` answers
    /// with raw chunk hashes.
    chunk_hash_key: Option<(XetHash, u64)>,
    /// Byte-range fetches served so far (for cache-behavior assertions).
    fetch_count: AtomicU64,
}

impl InMemoryCas {
    /// Create an endpoint that answers dedup queries with raw hashes.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CasState::default()),
            chunk_hash_key: None,
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Create an endpoint whose dedup responses are keyed under `key`
    /// with the given key expiry (epoch seconds, 0 = never).
    pub fn with_chunk_hash_key(key: XetHash, expiry: u64) -> Self {
        Self {
            state: RwLock::new(CasState::default()),
            chunk_hash_key: Some((key, expiry)),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Number of xorbs currently stored.
    pub fn num_xorbs(&self) -> usize {
        self.state.read().expect("lock poisoned").xorbs.len()
    }

    /// Number of files currently registered.
    pub fn num_files(&self) -> usize {
        self.state.read().expect("lock poisoned").files.len()
    }

    /// Number of byte-range fetches served since creation.
    pub fn num_fetches(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryCas {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CasTransport for InMemoryCas {
    async fn get_reconstruction(
        &self,
        file_hash: XetHash,
        byte_range: Option<HttpByteRange>,
    ) -> Result<ReconstructionResponse, TransportError> {
        let state = self.state.read().expect("lock poisoned");
        let file = state
            .files
            .get(&file_hash)
            .ok_or_else(|| TransportError::NotFound(format!("file {file_hash}")))?;

        let all_terms: Vec<ReconstructionTerm> = file
            .entries
            .iter()
            .map(|e| ReconstructionTerm {
                xorb_hash: e.xorb_hash,
                unpacked_length: e.unpacked_segment_bytes,
                chunk_range: ChunkRange::new(e.chunk_start, e.chunk_end),
            })
            .collect();

        let mut offset_into_first_range = 0u64;
        let terms = match byte_range {
            None => all_terms,
            Some(range) => {
                let total: u64 = all_terms.iter().map(|t| t.unpacked_length as u64).sum();
                if range.start > range.end || range.start >= total {
                    return Err(TransportError::Rejected(format!(
                        "unsatisfiable range {}-{} for {total}-byte file",
                        range.start, range.end
                    )));
                }

                let mut selected = Vec::new();
                let mut cursor = 0u64;
                for term in all_terms {
                    let term_start = cursor;
                    let term_end = cursor + term.unpacked_length as u64;
                    cursor = term_end;

                    if term_end <= range.start {
                        continue;
                    }
                    if term_start > range.end {
                        break;
                    }
                    if selected.is_empty() {
                        offset_into_first_range = range.start - term_start;
                    }
                    selected.push(term);
                }
                selected
            }
        };

        let mut fetch_info: HashMap<XetHash, Vec<FetchInfo>> = HashMap::new();
        for term in &terms {
            let stored = state
                .xorbs
                .get(&term.xorb_hash)
                .ok_or_else(|| TransportError::NotFound(format!("xorb {}", term.xorb_hash)))?;
            let (lo, hi) = stored
                .info
                .serialized_span(term.chunk_range.start, term.chunk_range.end);
            let descriptor = FetchInfo {
                chunk_range: term.chunk_range,
                url: format!("mem://xorbs/{}", term.xorb_hash),
                url_range: HttpByteRange::new(lo as u64, hi as u64 - 1),
            };

            let descriptors = fetch_info.entry(term.xorb_hash).or_default();
            if !descriptors.contains(&descriptor) {
                descriptors.push(descriptor);
            }
        }

        Ok(ReconstructionResponse {
            offset_into_first_range,
            terms,
            fetch_info,
        })
    }

    async fn query_dedup(
        &self,
        _namespace: &str,
        chunk_hash: XetHash,
    ) -> Result<Option<Bytes>, TransportError> {
        let state = self.state.read().expect("lock poisoned");
        let Some(xorb_hash) = state.chunk_index.get(&chunk_hash) else {
            return Ok(None);
        };
        let block = state
            .cas_blocks
            .get(xorb_hash)
            .ok_or_else(|| TransportError::NotFound(format!("cas block {xorb_hash}")))?;

        let chunks: Vec<(XetHash, u32)> = block
            .entries
            .iter()
            .map(|e| (e.chunk_hash, e.unpacked_segment_bytes))
            .collect();

        let mut builder = ShardBuilder::new();
        builder.add_cas_block(*xorb_hash, &chunks, block.num_bytes_on_disk, |i, h| {
            is_global_dedup_eligible(h, i == 0)
        });

        let (key, expiry) = self.chunk_hash_key.unwrap_or((XetHash::ZERO, 0));
        let shard = builder.build_stored(key, now_secs(), expiry);
        let bytes = serialize_shard_stored(&shard)
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        Ok(Some(Bytes::from(bytes)))
    }

    async fn put_xorb(
        &self,
        _namespace: &str,
        xorb_hash: XetHash,
        data: Bytes,
    ) -> Result<bool, TransportError> {
        let parsed =
            parse_xorb(&data).map_err(|e| TransportError::Rejected(e.to_string()))?;
        if parsed.info.xorb_hash != xorb_hash {
            return Err(TransportError::Rejected(format!(
                "xorb hash mismatch: content is {}, request says {xorb_hash}",
                parsed.info.xorb_hash
            )));
        }

        let mut state = self.state.write().expect("lock poisoned");
        if state.xorbs.contains_key(&xorb_hash) {
            return Ok(false);
        }
        debug!(%xorb_hash, bytes = data.len(), "stored xorb");
        state.xorbs.insert(
            xorb_hash,
            StoredXorb {
                data,
                info: parsed.info,
            },
        );
        Ok(true)
    }

    async fn put_shard(&self, shard: Bytes) -> Result<ShardRegistration, TransportError> {
        let parsed = parse_shard(&shard).map_err(|e| TransportError::Rejected(e.to_string()))?;

        let mut state = self.state.write().expect("lock poisoned");

        // Every xorb the shard mentions must already be uploaded.
        for block in &parsed.cas_blocks {
            if !state.xorbs.contains_key(&block.xorb_hash) {
                return Err(TransportError::Rejected(format!(
                    "shard references missing xorb {}",
                    block.xorb_hash
                )));
            }
        }
        for block in &parsed.file_blocks {
            for entry in &block.entries {
                if !state.xorbs.contains_key(&entry.xorb_hash) {
                    return Err(TransportError::Rejected(format!(
                        "file {} references missing xorb {}",
                        block.file_hash, entry.xorb_hash
                    )));
                }
            }
        }

        let already_known = parsed
            .file_blocks
            .iter()
            .all(|b| state.files.contains_key(&b.file_hash))
            && parsed
                .cas_blocks
                .iter()
                .all(|b| state.cas_blocks.contains_key(&b.xorb_hash));

        for block in parsed.cas_blocks {
            for entry in &block.entries {
                state.chunk_index.insert(entry.chunk_hash, block.xorb_hash);
            }
            state.cas_blocks.insert(block.xorb_hash, block);
        }
        for block in parsed.file_blocks {
            debug!(file_hash = %block.file_hash, terms = block.entries.len(), "registered file");
            state.files.insert(block.file_hash, block);
        }

        Ok(if already_known {
            ShardRegistration::AlreadyExisted
        } else {
            ShardRegistration::Registered
        })
    }

    async fn fetch_bytes(
        &self,
        url: &str,
        range: HttpByteRange,
    ) -> Result<Bytes, TransportError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let hash_str = url
            .strip_prefix("mem://xorbs/")
            .ok_or_else(|| TransportError::NotFound(format!("unknown url {url}")))?;
        let xorb_hash: XetHash = hash_str
            .parse()
            .map_err(|_| TransportError::NotFound(format!("bad xorb url {url}")))?;

        let state = self.state.read().expect("lock poisoned");
        let stored = state
            .xorbs
            .get(&xorb_hash)
            .ok_or_else(|| TransportError::NotFound(format!("xorb {xorb_hash}")))?;

        let start = range.start as usize;
        let end = range.end as usize + 1;
        if start >= end || end > stored.data.len() {
            return Err(TransportError::Rejected(format!(
                "unsatisfiable range {}-{} for {}-byte xorb",
                range.start,
                range.end,
                stored.data.len()
            )));
        }
        Ok(stored.data.slice(start..end))
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
