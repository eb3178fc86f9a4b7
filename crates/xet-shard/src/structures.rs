//! In-memory shard structures.

use xet_types::XetHash;

/// One term of a file reconstruction: a chunk run within a single xorb.
///
/// Serialized as a 48-byte `FileDataSequenceEntry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDataEntry {
    /// Hash of the xorb holding the chunks.
    pub xorb_hash: XetHash,
    /// Reserved flags, written as zero.
    pub cas_flags: u32,
    /// Total uncompressed bytes covered by the chunk range.
    pub unpacked_segment_bytes: u32,
    /// First chunk index within the xorb.
    pub chunk_start: u32,
    /// One past the last chunk index.
    pub chunk_end: u32,
}

/// One file reconstruction block in the file-info section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    /// Hash identifying the file.
    pub file_hash: XetHash,
    /// Ordered reconstruction terms.
    pub entries: Vec<FileDataEntry>,
    /// Per-term verification hashes; present iff non-empty, and then one
    /// per entry.
    pub verification: Vec<XetHash>,
    /// SHA-256 of the raw file bytes, when recorded.
    pub metadata_sha256: Option<[u8; 32]>,
}

/// One chunk record within a CAS block.
///
/// Serialized as a 48-byte `CASChunkSequenceEntry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasChunkEntry {
    /// Hash of the chunk.
    pub chunk_hash: XetHash,
    /// Prefix sum of preceding chunk sizes within the xorb.
    pub chunk_byte_range_start: u32,
    /// Uncompressed size of the chunk.
    pub unpacked_segment_bytes: u32,
    /// Flags; bit 31 marks global-dedup eligibility.
    pub flags: u32,
}

/// One xorb description block in the CAS-info section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasBlock {
    /// Hash identifying the xorb.
    pub xorb_hash: XetHash,
    /// Reserved flags, written as zero.
    pub cas_flags: u32,
    /// Chunk records in xorb order.
    pub entries: Vec<CasChunkEntry>,
    /// Total uncompressed bytes across the xorb's chunks.
    pub num_bytes_in_cas: u32,
    /// Serialized size of the xorb blob.
    pub num_bytes_on_disk: u32,
}

/// The 200-byte footer of a stored-form shard.
///
/// Offsets are absolute byte positions within the serialized shard. The
/// footer version evolves independently of the header version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFooter {
    /// Absolute offset of the file-info section.
    pub file_info_offset: u64,
    /// Absolute offset of the CAS-info section.
    pub cas_info_offset: u64,
    /// Absolute offset of the file lookup table.
    pub file_lookup_offset: u64,
    /// Entry count of the file lookup table.
    pub file_lookup_num_entries: u64,
    /// Absolute offset of the CAS lookup table.
    pub cas_lookup_offset: u64,
    /// Entry count of the CAS lookup table.
    pub cas_lookup_num_entries: u64,
    /// Absolute offset of the chunk lookup table.
    pub chunk_lookup_offset: u64,
    /// Entry count of the chunk lookup table.
    pub chunk_lookup_num_entries: u64,
    /// Key under which chunk-lookup hashes were keyed; zero means raw.
    pub chunk_hash_key: XetHash,
    /// Creation time, seconds since the epoch.
    pub shard_creation_timestamp: u64,
    /// Expiry of `chunk_hash_key`, seconds since the epoch.
    pub shard_key_expiry: u64,
    /// Sum of serialized xorb sizes referenced by the CAS section.
    pub stored_bytes_on_disk: u64,
    /// Sum of unpacked bytes across all file entries.
    pub materialized_bytes: u64,
    /// Sum of unpacked bytes across all CAS blocks.
    pub stored_bytes: u64,
    /// Absolute offset of the footer itself.
    pub footer_offset: u64,
}

/// A parsed or assembled shard.
///
/// `footer` and `lookups` are `None` for upload-form shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// File reconstruction blocks.
    pub file_blocks: Vec<FileBlock>,
    /// Xorb description blocks.
    pub cas_blocks: Vec<CasBlock>,
    /// Footer metadata (stored form only).
    pub footer: Option<ShardFooter>,
    /// Lookup tables (stored form only).
    pub lookups: Option<crate::lookup::ShardLookups>,
}

impl Shard {
    /// Find a CAS block by xorb hash.
    pub fn cas_block(&self, xorb_hash: &XetHash) -> Option<&CasBlock> {
        self.cas_blocks.iter().find(|b| b.xorb_hash == *xorb_hash)
    }

    /// Find a file block by file hash.
    pub fn file_block(&self, file_hash: &XetHash) -> Option<&FileBlock> {
        self.file_blocks.iter().find(|b| b.file_hash == *file_hash)
    }
}
