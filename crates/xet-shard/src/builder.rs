//! Incremental shard assembly.

use tracing::debug;
use xet_types::constants::CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE;
use xet_types::XetHash;

use crate::structures::{CasBlock, CasChunkEntry, FileBlock, FileDataEntry, Shard, ShardFooter};

/// Accumulates file and CAS blocks into a [`Shard`].
///
/// CAS blocks are deduplicated by xorb hash; adding the same xorb twice is
/// a no-op. Entry prefix sums and eligibility flags are derived here so
/// callers only supply chunk hashes and sizes.
#[derive(Default)]
pub struct ShardBuilder {
    file_blocks: Vec<FileBlock>,
    cas_blocks: Vec<CasBlock>,
    seen_xorbs: std::collections::HashSet<XetHash>,
}

impl ShardBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file reconstruction.
    ///
    /// `verification` must be empty or hold one hash per term.
    pub fn add_file(
        &mut self,
        file_hash: XetHash,
        entries: Vec<FileDataEntry>,
        verification: Vec<XetHash>,
        metadata_sha256: Option<[u8; 32]>,
    ) {
        debug_assert!(verification.is_empty() || verification.len() == entries.len());
        self.file_blocks.push(FileBlock {
            file_hash,
            entries,
            verification,
            metadata_sha256,
        });
    }

    /// Add a xorb description from its chunk hashes and sizes.
    ///
    /// `dedup_eligible` marks chunks to flag for global deduplication;
    /// `serialized_size` is the xorb blob size on disk.
    pub fn add_cas_block(
        &mut self,
        xorb_hash: XetHash,
        chunks: &[(XetHash, u32)],
        serialized_size: u32,
        dedup_eligible: impl Fn(usize, &XetHash) -> bool,
    ) {
        if !self.seen_xorbs.insert(xorb_hash) {
            return;
        }

        let mut entries = Vec::with_capacity(chunks.len());
        let mut offset = 0u32;
        for (i, (chunk_hash, size)) in chunks.iter().enumerate() {
            let flags = if dedup_eligible(i, chunk_hash) {
                CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE
            } else {
                0
            };
            entries.push(CasChunkEntry {
                chunk_hash: *chunk_hash,
                chunk_byte_range_start: offset,
                unpacked_segment_bytes: *size,
                flags,
            });
            offset += size;
        }

        self.cas_blocks.push(CasBlock {
            xorb_hash,
            cas_flags: 0,
            entries,
            num_bytes_in_cas: offset,
            num_bytes_on_disk: serialized_size,
        });
    }

    /// Number of file blocks added so far.
    pub fn num_files(&self) -> usize {
        self.file_blocks.len()
    }

    /// Assemble an upload-form shard (no footer).
    pub fn build(self) -> Shard {
        debug!(
            files = self.file_blocks.len(),
            xorbs = self.cas_blocks.len(),
            "assembled shard"
        );
        Shard {
            file_blocks: self.file_blocks,
            cas_blocks: self.cas_blocks,
            footer: None,
            lookups: None,
        }
    }

    /// Assemble a stored-form shard with footer metadata.
    ///
    /// Offsets and statistics in the footer are placeholders here; the
    /// stored-form serializer recomputes them, and parsing fills them in.
    pub fn build_stored(
        self,
        chunk_hash_key: XetHash,
        creation_timestamp: u64,
        key_expiry: u64,
    ) -> Shard {
        let mut shard = self.build();
        shard.footer = Some(ShardFooter {
            file_info_offset: 0,
            cas_info_offset: 0,
            file_lookup_offset: 0,
            file_lookup_num_entries: 0,
            cas_lookup_offset: 0,
            cas_lookup_num_entries: 0,
            chunk_lookup_offset: 0,
            chunk_lookup_num_entries: 0,
            chunk_hash_key,
            shard_creation_timestamp: creation_timestamp,
            shard_key_expiry: key_expiry,
            stored_bytes_on_disk: 0,
            materialized_bytes: 0,
            stored_bytes: 0,
            footer_offset: 0,
        });
        shard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse_shard, serialize_shard_stored, serialize_shard_upload};

    fn hash(seed: u8) -> XetHash {
        xet_hash::chunk_hash(&[seed])
    }

    #[test]
    fn test_cas_block_prefix_sums() {
        let mut builder = ShardBuilder::new();
        let chunks = vec![(hash(1), 100), (hash(2), 250), (hash(3), 50)];
        builder.add_cas_block(hash(9), &chunks, 512, |_, _| false);

        let shard = builder.build();
        let entries = &shard.cas_blocks[0].entries;
        assert_eq!(entries[0].chunk_byte_range_start, 0);
        assert_eq!(entries[1].chunk_byte_range_start, 100);
        assert_eq!(entries[2].chunk_byte_range_start, 350);
        assert_eq!(shard.cas_blocks[0].num_bytes_in_cas, 400);
        assert_eq!(shard.cas_blocks[0].num_bytes_on_disk, 512);
    }

    #[test]
    fn test_duplicate_xorb_ignored() {
        let mut builder = ShardBuilder::new();
        let chunks = vec![(hash(1), 100)];
        builder.add_cas_block(hash(9), &chunks, 120, |_, _| false);
        builder.add_cas_block(hash(9), &chunks, 120, |_, _| false);
        assert_eq!(builder.build().cas_blocks.len(), 1);
    }

    #[test]
    fn test_eligibility_flags() {
        let mut builder = ShardBuilder::new();
        let chunks = vec![(hash(1), 100), (hash(2), 100)];
        builder.add_cas_block(hash(9), &chunks, 220, |i, _| i == 0);

        let shard = builder.build();
        assert_eq!(
            shard.cas_blocks[0].entries[0].flags,
            CHUNK_FLAG_GLOBAL_DEDUP_ELIGIBLE
        );
        assert_eq!(shard.cas_blocks[0].entries[1].flags, 0);
    }

    #[test]
    fn test_built_shard_serializes_both_forms() {
        let mut builder = ShardBuilder::new();
        builder.add_cas_block(hash(9), &[(hash(1), 64)], 80, |_, _| false);
        builder.add_file(
            hash(20),
            vec![FileDataEntry {
                xorb_hash: hash(9),
                cas_flags: 0,
                unpacked_segment_bytes: 64,
                chunk_start: 0,
                chunk_end: 1,
            }],
            vec![hash(21)],
            None,
        );

        let shard = builder.build_stored(XetHash::ZERO, 1_700_000_000, 0);
        let upload = serialize_shard_upload(&shard);
        let stored = serialize_shard_stored(&shard).unwrap();

        assert!(stored.len() > upload.len());
        assert_eq!(parse_shard(&upload).unwrap().file_blocks.len(), 1);
        assert_eq!(parse_shard(&stored).unwrap().file_blocks.len(), 1);
    }
}
