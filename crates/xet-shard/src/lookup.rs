//! Sorted lookup tables of a stored-form shard.
//!
//! Each table keys on the low 8 bytes of a 32-byte hash, read as a
//! little-endian u64, and is sorted ascending so readers can binary-search.
//! Truncated keys can collide, so lookups return every entry under a key
//! and callers disambiguate (or, for keyed chunk lookups, accept the match
//! as-is — the full hash is deliberately withheld).

use xet_hash::keyed_chunk_hash;
use xet_types::XetHash;

use crate::structures::{CasBlock, FileBlock};

/// File lookup record: truncated file hash → file block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileLookupEntry {
    /// Low 8 bytes of the file hash.
    pub trunc_hash: u64,
    /// Index into the file-info section.
    pub file_index: u32,
}

/// CAS lookup record: truncated xorb hash → CAS block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CasLookupEntry {
    /// Low 8 bytes of the xorb hash.
    pub trunc_hash: u64,
    /// Index into the CAS-info section.
    pub cas_index: u32,
}

/// Chunk lookup record: truncated (possibly keyed) chunk hash → location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkLookupEntry {
    /// Low 8 bytes of the chunk hash, keyed when the footer carries a key.
    pub trunc_hash: u64,
    /// Index of the CAS block holding the chunk.
    pub cas_index: u32,
    /// Chunk index within that CAS block.
    pub chunk_index: u32,
}

/// The three lookup tables, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardLookups {
    /// Truncated file hash → file index.
    pub file_lookup: Vec<FileLookupEntry>,
    /// Truncated xorb hash → CAS index.
    pub cas_lookup: Vec<CasLookupEntry>,
    /// Truncated chunk hash → (CAS index, chunk index).
    pub chunk_lookup: Vec<ChunkLookupEntry>,
}

impl ShardLookups {
    /// Build the tables from the two sections.
    ///
    /// When `chunk_hash_key` is non-zero, chunk keys are the truncated
    /// keyed hash of each chunk hash; otherwise the truncated raw hash.
    pub fn build(
        file_blocks: &[FileBlock],
        cas_blocks: &[CasBlock],
        chunk_hash_key: &XetHash,
    ) -> Self {
        let keyed = *chunk_hash_key != XetHash::ZERO;

        let mut file_lookup: Vec<FileLookupEntry> = file_blocks
            .iter()
            .enumerate()
            .map(|(i, b)| FileLookupEntry {
                trunc_hash: b.file_hash.first_u64(),
                file_index: i as u32,
            })
            .collect();
        file_lookup.sort_unstable();

        let mut cas_lookup: Vec<CasLookupEntry> = cas_blocks
            .iter()
            .enumerate()
            .map(|(i, b)| CasLookupEntry {
                trunc_hash: b.xorb_hash.first_u64(),
                cas_index: i as u32,
            })
            .collect();
        cas_lookup.sort_unstable();

        let mut chunk_lookup = Vec::new();
        for (cas_index, block) in cas_blocks.iter().enumerate() {
            for (chunk_index, entry) in block.entries.iter().enumerate() {
                let trunc_hash = if keyed {
                    keyed_chunk_hash(chunk_hash_key, &entry.chunk_hash).first_u64()
                } else {
                    entry.chunk_hash.first_u64()
                };
                chunk_lookup.push(ChunkLookupEntry {
                    trunc_hash,
                    cas_index: cas_index as u32,
                    chunk_index: chunk_index as u32,
                });
            }
        }
        chunk_lookup.sort_unstable();

        Self {
            file_lookup,
            cas_lookup,
            chunk_lookup,
        }
    }

    /// All chunk entries stored under a truncated key.
    pub fn find_chunks(&self, trunc_hash: u64) -> &[ChunkLookupEntry] {
        let lo = self
            .chunk_lookup
            .partition_point(|e| e.trunc_hash < trunc_hash);
        let hi = self
            .chunk_lookup
            .partition_point(|e| e.trunc_hash <= trunc_hash);
        &self.chunk_lookup[lo..hi]
    }

    /// All file entries stored under a truncated key.
    pub fn find_files(&self, trunc_hash: u64) -> &[FileLookupEntry] {
        let lo = self
            .file_lookup
            .partition_point(|e| e.trunc_hash < trunc_hash);
        let hi = self
            .file_lookup
            .partition_point(|e| e.trunc_hash <= trunc_hash);
        &self.file_lookup[lo..hi]
    }

    /// All CAS entries stored under a truncated key.
    pub fn find_cas(&self, trunc_hash: u64) -> &[CasLookupEntry] {
        let lo = self
            .cas_lookup
            .partition_point(|e| e.trunc_hash < trunc_hash);
        let hi = self
            .cas_lookup
            .partition_point(|e| e.trunc_hash <= trunc_hash);
        &self.cas_lookup[lo..hi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::CasChunkEntry;

    fn cas_block(seed: u8, num_chunks: usize) -> CasBlock {
        let mut entries = Vec::new();
        let mut offset = 0u32;
        for i in 0..num_chunks {
            let chunk_hash = xet_hash::chunk_hash(&[seed, i as u8]);
            entries.push(CasChunkEntry {
                chunk_hash,
                chunk_byte_range_start: offset,
                unpacked_segment_bytes: 1000,
                flags: 0,
            });
            offset += 1000;
        }
        CasBlock {
            xorb_hash: xet_hash::chunk_hash(&[seed]),
            cas_flags: 0,
            entries,
            num_bytes_in_cas: offset,
            num_bytes_on_disk: offset + 64,
        }
    }

    #[test]
    fn test_tables_sorted() {
        let blocks = vec![cas_block(1, 20), cas_block(2, 20)];
        let lookups = ShardLookups::build(&[], &blocks, &XetHash::ZERO);

        assert!(lookups.chunk_lookup.windows(2).all(|w| w[0] <= w[1]));
        assert!(lookups.cas_lookup.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(lookups.chunk_lookup.len(), 40);
        assert_eq!(lookups.cas_lookup.len(), 2);
    }

    #[test]
    fn test_find_chunk_by_raw_trunc() {
        let blocks = vec![cas_block(3, 10)];
        let lookups = ShardLookups::build(&[], &blocks, &XetHash::ZERO);

        let target = blocks[0].entries[4].chunk_hash;
        let found = lookups.find_chunks(target.first_u64());
        assert!(found
            .iter()
            .any(|e| e.cas_index == 0 && e.chunk_index == 4));
    }

    #[test]
    fn test_find_chunk_by_keyed_trunc() {
        let blocks = vec![cas_block(4, 10)];
        let key = XetHash::from([9u8; 32]);
        let lookups = ShardLookups::build(&[], &blocks, &key);

        let target = blocks[0].entries[7].chunk_hash;
        let keyed = keyed_chunk_hash(&key, &target);
        let found = lookups.find_chunks(keyed.first_u64());
        assert!(found
            .iter()
            .any(|e| e.cas_index == 0 && e.chunk_index == 7));

        // The raw truncation misses when the table is keyed.
        assert!(lookups.find_chunks(target.first_u64()).is_empty());
    }

    #[test]
    fn test_find_missing_key_returns_empty() {
        let blocks = vec![cas_block(5, 3)];
        let lookups = ShardLookups::build(&[], &blocks, &XetHash::ZERO);
        assert!(lookups.find_chunks(0xDEAD_BEEF_DEAD_BEEF).is_empty());
    }
}
