//! The upload pipeline: chunk → dedup → xorb formation → shard.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use xet_chunk::GearChunker;
use xet_hash::is_global_dedup_eligible;
use xet_shard::{serialize_shard_upload, FileDataEntry, ShardBuilder};
use xet_types::constants::TARGET_XORB_CHUNKS;
use xet_types::XetHash;
use xet_xorb::{BuiltXorb, CompressionScheme, XorbBuilder};

use crate::dedup::DedupIndex;
use crate::error::TransferError;
use crate::transport::CasTransport;

/// Tunables for an upload session.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Namespace passed to dedup queries and xorb uploads.
    pub namespace: String,
    /// Compression attempted for new chunks.
    pub compression: CompressionScheme,
    /// Whether to query the global dedup endpoint for eligible chunks.
    pub enable_global_dedup: bool,
    /// Minimum contiguous matched chunks before a dedup reference is taken.
    pub min_dedup_run_chunks: usize,
    /// Alternative byte threshold for accepting a matched run.
    pub min_dedup_run_bytes: u64,
    /// Chunk count at which an in-progress xorb is closed.
    pub target_xorb_chunks: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            compression: CompressionScheme::Lz4,
            enable_global_dedup: true,
            min_dedup_run_chunks: 8,
            min_dedup_run_bytes: 1024 * 1024,
            target_xorb_chunks: TARGET_XORB_CHUNKS,
        }
    }
}

/// Statistics reported after an upload completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    /// File hashes, in the order files were added.
    pub file_hashes: Vec<XetHash>,
    /// Chunk occurrences across all files.
    pub total_chunks: usize,
    /// Chunks packed into new xorbs.
    pub new_chunks: usize,
    /// Distinct chunks referenced from remote xorbs via global dedup.
    pub reused_chunks: usize,
    /// Xorbs uploaded this session.
    pub xorbs_uploaded: usize,
    /// Serialized xorb bytes sent.
    pub bytes_uploaded: u64,
    /// Input bytes that did not need fresh upload (session + global dedup).
    pub dedup_saved_bytes: u64,
}

/// Where a chunk of this session's files ended up.
#[derive(Debug, Clone, Copy)]
struct ChunkLocation {
    xorb: XetHash,
    index: u32,
    size: u32,
}

struct PlannedChunk {
    hash: XetHash,
    data: Bytes,
}

struct FilePlan {
    chunks: Vec<PlannedChunk>,
    file_hash: XetHash,
    sha256: [u8; 32],
    size: u64,
}

/// Packs new chunks into xorbs, assigning locations at flush time (a
/// xorb's hash is only known once its chunk list is final).
struct XorbFormer {
    builder: XorbBuilder,
    pending: Vec<(XetHash, u32)>,
    xorbs: Vec<BuiltXorb>,
    scheme: CompressionScheme,
    target_chunks: usize,
}

impl XorbFormer {
    fn new(scheme: CompressionScheme, target_chunks: usize) -> Self {
        Self {
            builder: XorbBuilder::new(scheme),
            pending: Vec::new(),
            xorbs: Vec::new(),
            scheme,
            target_chunks,
        }
    }

    fn contains(&self, hash: &XetHash) -> bool {
        self.builder.contains(hash)
    }

    fn add(
        &mut self,
        hash: XetHash,
        data: Bytes,
        locations: &mut HashMap<XetHash, ChunkLocation>,
    ) -> Result<(), TransferError> {
        if !self.builder.can_add(data.len()) || self.builder.num_chunks() >= self.target_chunks {
            self.flush(locations)?;
        }
        let size = data.len() as u32;
        self.builder.add(hash, data)?;
        self.pending.push((hash, size));
        Ok(())
    }

    fn flush(
        &mut self,
        locations: &mut HashMap<XetHash, ChunkLocation>,
    ) -> Result<(), TransferError> {
        if self.builder.is_empty() {
            return Ok(());
        }
        let builder = std::mem::replace(&mut self.builder, XorbBuilder::new(self.scheme));
        let built = builder.build()?;
        for (index, (hash, size)) in self.pending.drain(..).enumerate() {
            locations.insert(
                hash,
                ChunkLocation {
                    xorb: built.hash,
                    index: index as u32,
                    size,
                },
            );
        }
        self.xorbs.push(built);
        Ok(())
    }
}

/// Manages the upload of one or more files against a CAS endpoint.
///
/// Files are added with [`add_file`](Self::add_file), which chunks and
/// hashes them; [`upload`](Self::upload) then runs deduplication, packs
/// new chunks into xorbs, uploads every xorb, and registers one shard
/// describing all files. Xorb uploads run concurrently, and the shard is
/// only registered after every referenced xorb upload has completed.
pub struct UploadSession {
    transport: Arc<dyn CasTransport>,
    config: UploadConfig,
    files: Vec<FilePlan>,
    dedup: DedupIndex,
    locations: HashMap<XetHash, ChunkLocation>,
}

impl UploadSession {
    /// Create a session over the given transport.
    pub fn new(transport: Arc<dyn CasTransport>, config: UploadConfig) -> Self {
        Self {
            transport,
            config,
            files: Vec::new(),
            dedup: DedupIndex::new(),
            locations: HashMap::new(),
        }
    }

    /// Add a file to the session, returning its file hash.
    ///
    /// Chunks, chunk hashes, the file hash, and the whole-file SHA-256 are
    /// computed here; nothing touches the network until
    /// [`upload`](Self::upload).
    pub fn add_file(&mut self, data: &[u8]) -> XetHash {
        let chunks: Vec<PlannedChunk> = GearChunker::chunk(data)
            .into_iter()
            .map(|c| PlannedChunk {
                hash: xet_hash::chunk_hash(&c.data),
                data: c.data,
            })
            .collect();

        let entries: Vec<(XetHash, u64)> = chunks
            .iter()
            .map(|c| (c.hash, c.data.len() as u64))
            .collect();
        let file_hash = xet_hash::file_hash(&entries);

        debug!(%file_hash, size = data.len(), num_chunks = chunks.len(), "planned file");

        self.files.push(FilePlan {
            chunks,
            file_hash,
            sha256: Sha256::digest(data).into(),
            size: data.len() as u64,
        });
        file_hash
    }

    /// Execute the upload. Returns per-session statistics.
    pub async fn upload(&mut self) -> Result<UploadSummary, TransferError> {
        let total_bytes: u64 = self.files.iter().map(|f| f.size).sum();
        info!(
            files = self.files.len(),
            total_bytes, "starting upload session"
        );

        if self.config.enable_global_dedup {
            self.query_global_dedup().await?;
        }
        let reused_chunks = self.accept_dedup_runs();

        // Pack everything still unplaced into xorbs, in file order.
        let mut former = XorbFormer::new(self.config.compression, self.config.target_xorb_chunks);
        for file in &self.files {
            for chunk in &file.chunks {
                if self.locations.contains_key(&chunk.hash) || former.contains(&chunk.hash) {
                    continue;
                }
                former.add(chunk.hash, chunk.data.clone(), &mut self.locations)?;
            }
        }
        former.flush(&mut self.locations)?;
        let xorbs = former.xorbs;

        // Upload xorbs concurrently; all must land before the shard does.
        let mut handles = Vec::with_capacity(xorbs.len());
        for xorb in &xorbs {
            let transport = Arc::clone(&self.transport);
            let namespace = self.config.namespace.clone();
            let hash = xorb.hash;
            let data = xorb.data.clone();
            handles.push(tokio::spawn(async move {
                transport.put_xorb(&namespace, hash, data).await
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| TransferError::TaskFailed(e.to_string()))??;
        }

        let mut shard_builder = ShardBuilder::new();
        for i in 0..self.files.len() {
            let (terms, verification) = self.build_terms(i)?;
            shard_builder.add_file(
                self.files[i].file_hash,
                terms,
                verification,
                Some(self.files[i].sha256),
            );
        }
        for xorb in &xorbs {
            let chunks: Vec<(XetHash, u32)> = xorb
                .info
                .chunk_hashes
                .iter()
                .enumerate()
                .map(|(i, h)| (*h, xorb.info.chunk_size(i)))
                .collect();
            shard_builder.add_cas_block(xorb.hash, &chunks, xorb.data.len() as u32, |i, h| {
                is_global_dedup_eligible(h, i == 0)
            });
        }
        let shard_bytes = serialize_shard_upload(&shard_builder.build());
        self.transport.put_shard(shard_bytes.into()).await?;

        let new_chunks: usize = xorbs.iter().map(|x| x.info.num_chunks()).sum();
        let bytes_uploaded: u64 = xorbs.iter().map(|x| x.data.len() as u64).sum();
        let new_bytes: u64 = xorbs.iter().map(|x| x.unpacked_len() as u64).sum();

        let summary = UploadSummary {
            file_hashes: self.files.iter().map(|f| f.file_hash).collect(),
            total_chunks: self.files.iter().map(|f| f.chunks.len()).sum(),
            new_chunks,
            reused_chunks,
            xorbs_uploaded: xorbs.len(),
            bytes_uploaded,
            dedup_saved_bytes: total_bytes.saturating_sub(new_bytes),
        };
        info!(
            xorbs = summary.xorbs_uploaded,
            new_chunks = summary.new_chunks,
            reused_chunks = summary.reused_chunks,
            saved_bytes = summary.dedup_saved_bytes,
            "upload session complete"
        );
        Ok(summary)
    }

    /// Query the dedup endpoint for every eligible, still-unmatched chunk.
    async fn query_global_dedup(&mut self) -> Result<(), TransferError> {
        let now = now_secs();
        self.dedup.evict_expired(now);

        let all_hashes: Vec<XetHash> = {
            let mut seen = HashSet::new();
            self.files
                .iter()
                .flat_map(|f| &f.chunks)
                .map(|c| c.hash)
                .filter(|h| seen.insert(*h))
                .collect()
        };

        let mut queried = HashSet::new();
        for file in &self.files {
            for (i, chunk) in file.chunks.iter().enumerate() {
                if self.dedup.lookup(&chunk.hash).is_some() {
                    continue;
                }
                if !is_global_dedup_eligible(&chunk.hash, i == 0) || !queried.insert(chunk.hash) {
                    continue;
                }
                let response = self
                    .transport
                    .query_dedup(&self.config.namespace, chunk.hash)
                    .await?;
                if let Some(bytes) = response {
                    let shard = xet_shard::parse_shard(&bytes)?;
                    self.dedup.add_shard(&shard, &all_hashes, now);
                }
            }
        }
        Ok(())
    }

    /// Accept dedup matches, but only in runs long enough to keep files
    /// from fragmenting across many xorbs.
    fn accept_dedup_runs(&mut self) -> usize {
        let mut accepted = 0usize;

        for file in &self.files {
            let mut i = 0;
            while i < file.chunks.len() {
                let Some(first) = self.dedup.lookup(&file.chunks[i].hash) else {
                    i += 1;
                    continue;
                };

                let mut run_bytes = first.size as u64;
                let mut prev = *first;
                let mut j = i + 1;
                while j < file.chunks.len() {
                    let Some(next) = self.dedup.lookup(&file.chunks[j].hash) else {
                        break;
                    };
                    if next.xorb_hash != prev.xorb_hash
                        || next.chunk_index != prev.chunk_index + 1
                    {
                        break;
                    }
                    run_bytes += next.size as u64;
                    prev = *next;
                    j += 1;
                }

                let run_chunks = j - i;
                if run_chunks >= self.config.min_dedup_run_chunks
                    || run_bytes >= self.config.min_dedup_run_bytes
                {
                    for chunk in &file.chunks[i..j] {
                        let location = self.dedup.lookup(&chunk.hash).expect("matched above");
                        if self
                            .locations
                            .insert(
                                chunk.hash,
                                ChunkLocation {
                                    xorb: location.xorb_hash,
                                    index: location.chunk_index,
                                    size: location.size,
                                },
                            )
                            .is_none()
                        {
                            accepted += 1;
                        }
                    }
                } else {
                    debug!(
                        run_chunks,
                        run_bytes, "rejecting short dedup run to avoid fragmentation"
                    );
                }
                i = j;
            }
        }
        accepted
    }

    /// Coalesce a file's chunk locations into reconstruction terms, with
    /// one verification hash per term.
    fn build_terms(
        &self,
        file_index: usize,
    ) -> Result<(Vec<FileDataEntry>, Vec<XetHash>), TransferError> {
        let file = &self.files[file_index];
        let chunk_hashes: Vec<XetHash> = file.chunks.iter().map(|c| c.hash).collect();

        let mut terms = Vec::new();
        let mut term_spans: Vec<(usize, usize)> = Vec::new();
        let mut current: Option<TermAcc> = None;

        for (pos, chunk) in file.chunks.iter().enumerate() {
            let location = self
                .locations
                .get(&chunk.hash)
                .copied()
                .ok_or(TransferError::UnplacedChunk(chunk.hash))?;

            let extends = current
                .as_ref()
                .is_some_and(|acc| acc.xorb == location.xorb && acc.chunk_end == location.index);

            if extends {
                let acc = current.as_mut().expect("checked above");
                acc.chunk_end += 1;
                acc.bytes += location.size as u64;
            } else {
                if let Some(acc) = current.take() {
                    term_spans.push((acc.file_start, pos));
                    terms.push(acc.into_entry());
                }
                current = Some(TermAcc {
                    xorb: location.xorb,
                    chunk_start: location.index,
                    chunk_end: location.index + 1,
                    bytes: location.size as u64,
                    file_start: pos,
                });
            }
        }
        if let Some(acc) = current.take() {
            term_spans.push((acc.file_start, file.chunks.len()));
            terms.push(acc.into_entry());
        }

        let verification = term_spans
            .iter()
            .map(|&(start, end)| xet_hash::verification_hash(&chunk_hashes[start..end]))
            .collect();

        Ok((terms, verification))
    }
}

/// In-progress reconstruction term during coalescing.
struct TermAcc {
    xorb: XetHash,
    chunk_start: u32,
    chunk_end: u32,
    bytes: u64,
    file_start: usize,
}

impl TermAcc {
    fn into_entry(self) -> FileDataEntry {
        FileDataEntry {
            xorb_hash: self.xorb,
            cas_flags: 0,
            unpacked_segment_bytes: self.bytes as u32,
            chunk_start: self.chunk_start,
            chunk_end: self.chunk_end,
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
