//! Binary serializer and parser for both shard forms.

use xet_types::constants::{
    FILE_FLAG_WITH_METADATA_EXT, FILE_FLAG_WITH_VERIFICATION, SHARD_APPLICATION_ID,
    SHARD_FOOTER_SIZE, SHARD_FOOTER_VERSION, SHARD_HEADER_TAG, SHARD_HEADER_VERSION,
    SHARD_MAGIC_SEQUENCE,
};
use xet_types::XetHash;

use crate::error::ShardError;
use crate::lookup::{CasLookupEntry, ChunkLookupEntry, FileLookupEntry, ShardLookups};
use crate::structures::{
    CasBlock, CasChunkEntry, FileBlock, FileDataEntry, Shard, ShardFooter,
};

/// Every fixed record in the header and the two sections is this size.
const RECORD_SIZE: usize = 48;

/// Section terminator: 32 bytes of 0xFF followed by 16 zero bytes.
const BOOKEND_HASH: [u8; 32] = [0xFF; 32];

// ---------------------------------------------------------------------------
// Little-endian helpers
// ---------------------------------------------------------------------------

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn get_u32(data: &[u8], at: usize) -> Result<u32, ShardError> {
    let bytes = data.get(at..at + 4).ok_or(ShardError::Truncated(at))?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
}

fn get_u64(data: &[u8], at: usize) -> Result<u64, ShardError> {
    let bytes = data.get(at..at + 8).ok_or(ShardError::Truncated(at))?;
    Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
}

fn get_hash(data: &[u8], at: usize) -> Result<XetHash, ShardError> {
    let bytes: [u8; 32] = data
        .get(at..at + 32)
        .ok_or(ShardError::Truncated(at))?
        .try_into()
        .expect("32-byte slice");
    Ok(XetHash::from(bytes))
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn write_header(out: &mut Vec<u8>, footer_size: u64) {
    out.extend_from_slice(&SHARD_HEADER_TAG);
    put_u64(out, SHARD_HEADER_VERSION);
    put_u64(out, footer_size);
}

fn write_bookend(out: &mut Vec<u8>) {
    out.extend_from_slice(&BOOKEND_HASH);
    out.extend_from_slice(&[0u8; 16]);
}

fn write_file_block(out: &mut Vec<u8>, block: &FileBlock) {
    let mut flags = 0u32;
    if !block.verification.is_empty() {
        flags |= FILE_FLAG_WITH_VERIFICATION;
    }
    if block.metadata_sha256.is_some() {
        flags |= FILE_FLAG_WITH_METADATA_EXT;
    }

    out.extend_from_slice(block.file_hash.as_bytes());
    put_u32(out, flags);
    put_u32(out, block.entries.len() as u32);
    out.extend_from_slice(&[0u8; 8]);

    for entry in &block.entries {
        out.extend_from_slice(entry.xorb_hash.as_bytes());
        put_u32(out, entry.cas_flags);
        put_u32(out, entry.unpacked_segment_bytes);
        put_u32(out, entry.chunk_start);
        put_u32(out, entry.chunk_end);
    }

    for hash in &block.verification {
        out.extend_from_slice(hash.as_bytes());
        out.extend_from_slice(&[0u8; 16]);
    }

    if let Some(sha256) = &block.metadata_sha256 {
        out.extend_from_slice(sha256);
        out.extend_from_slice(&[0u8; 16]);
    }
}

fn write_cas_block(out: &mut Vec<u8>, block: &CasBlock) {
    out.extend_from_slice(block.xorb_hash.as_bytes());
    put_u32(out, block.cas_flags);
    put_u32(out, block.entries.len() as u32);
    put_u32(out, block.num_bytes_in_cas);
    put_u32(out, block.num_bytes_on_disk);

    for entry in &block.entries {
        out.extend_from_slice(entry.chunk_hash.as_bytes());
        put_u32(out, entry.chunk_byte_range_start);
        put_u32(out, entry.unpacked_segment_bytes);
        put_u32(out, entry.flags);
        out.extend_from_slice(&[0u8; 4]);
    }
}

fn write_sections(out: &mut Vec<u8>, shard: &Shard) -> (u64, u64) {
    let file_info_offset = out.len() as u64;
    for block in &shard.file_blocks {
        write_file_block(out, block);
    }
    write_bookend(out);

    let cas_info_offset = out.len() as u64;
    for block in &shard.cas_blocks {
        write_cas_block(out, block);
    }
    write_bookend(out);

    (file_info_offset, cas_info_offset)
}

/// Serialize a shard in upload form: header and sections, no footer.
pub fn serialize_shard_upload(shard: &Shard) -> Vec<u8> {
    let mut out = Vec::new();
    write_header(&mut out, 0);
    write_sections(&mut out, shard);
    out
}

/// Serialize a shard in stored form: sections, lookup tables, footer.
///
/// Key, timestamps, and expiry come from `shard.footer`; offsets, entry
/// counts, and byte statistics are recomputed, so a parsed stored shard
/// re-serializes to the identical bytes.
pub fn serialize_shard_stored(shard: &Shard) -> Result<Vec<u8>, ShardError> {
    let footer_meta = shard.footer.as_ref().ok_or(ShardError::MissingFooter)?;

    let mut out = Vec::new();
    write_header(&mut out, SHARD_FOOTER_SIZE as u64);
    let (file_info_offset, cas_info_offset) = write_sections(&mut out, shard);

    let lookups = ShardLookups::build(
        &shard.file_blocks,
        &shard.cas_blocks,
        &footer_meta.chunk_hash_key,
    );

    let file_lookup_offset = out.len() as u64;
    for e in &lookups.file_lookup {
        put_u64(&mut out, e.trunc_hash);
        put_u32(&mut out, e.file_index);
    }
    let cas_lookup_offset = out.len() as u64;
    for e in &lookups.cas_lookup {
        put_u64(&mut out, e.trunc_hash);
        put_u32(&mut out, e.cas_index);
    }
    let chunk_lookup_offset = out.len() as u64;
    for e in &lookups.chunk_lookup {
        put_u64(&mut out, e.trunc_hash);
        put_u32(&mut out, e.cas_index);
        put_u32(&mut out, e.chunk_index);
    }

    let materialized_bytes: u64 = shard
        .file_blocks
        .iter()
        .flat_map(|b| &b.entries)
        .map(|e| e.unpacked_segment_bytes as u64)
        .sum();
    let stored_bytes: u64 = shard
        .cas_blocks
        .iter()
        .map(|b| b.num_bytes_in_cas as u64)
        .sum();
    let stored_bytes_on_disk: u64 = shard
        .cas_blocks
        .iter()
        .map(|b| b.num_bytes_on_disk as u64)
        .sum();

    let footer_offset = out.len() as u64;
    put_u64(&mut out, SHARD_FOOTER_VERSION);
    put_u64(&mut out, file_info_offset);
    put_u64(&mut out, cas_info_offset);
    put_u64(&mut out, file_lookup_offset);
    put_u64(&mut out, lookups.file_lookup.len() as u64);
    put_u64(&mut out, cas_lookup_offset);
    put_u64(&mut out, lookups.cas_lookup.len() as u64);
    put_u64(&mut out, chunk_lookup_offset);
    put_u64(&mut out, lookups.chunk_lookup.len() as u64);
    out.extend_from_slice(footer_meta.chunk_hash_key.as_bytes());
    put_u64(&mut out, footer_meta.shard_creation_timestamp);
    put_u64(&mut out, footer_meta.shard_key_expiry);
    out.extend_from_slice(&[0u8; 48]);
    put_u64(&mut out, stored_bytes_on_disk);
    put_u64(&mut out, materialized_bytes);
    put_u64(&mut out, stored_bytes);
    put_u64(&mut out, footer_offset);

    debug_assert_eq!(out.len() as u64 - footer_offset, SHARD_FOOTER_SIZE as u64);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn is_bookend(data: &[u8], at: usize) -> bool {
    data.get(at..at + 32)
        .map(|s| s == BOOKEND_HASH.as_slice())
        .unwrap_or(false)
}

fn parse_file_blocks(
    data: &[u8],
    mut at: usize,
    limit: usize,
) -> Result<(Vec<FileBlock>, usize), ShardError> {
    let mut blocks = Vec::new();

    loop {
        if at + RECORD_SIZE > limit {
            return Err(ShardError::MissingBookend("file-info"));
        }
        if is_bookend(data, at) {
            return Ok((blocks, at + RECORD_SIZE));
        }

        let file_hash = get_hash(data, at)?;
        let flags = get_u32(data, at + 32)?;
        let num_entries = get_u32(data, at + 36)? as usize;
        at += RECORD_SIZE;

        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            if at + RECORD_SIZE > limit {
                return Err(ShardError::Truncated(at));
            }
            let entry = FileDataEntry {
                xorb_hash: get_hash(data, at)?,
                cas_flags: get_u32(data, at + 32)?,
                unpacked_segment_bytes: get_u32(data, at + 36)?,
                chunk_start: get_u32(data, at + 40)?,
                chunk_end: get_u32(data, at + 44)?,
            };
            if entry.chunk_end <= entry.chunk_start {
                return Err(ShardError::InvalidChunkRange {
                    start: entry.chunk_start,
                    end: entry.chunk_end,
                });
            }
            entries.push(entry);
            at += RECORD_SIZE;
        }

        let mut verification = Vec::new();
        if flags & FILE_FLAG_WITH_VERIFICATION != 0 {
            for _ in 0..num_entries {
                if at + RECORD_SIZE > limit {
                    return Err(ShardError::Truncated(at));
                }
                verification.push(get_hash(data, at)?);
                at += RECORD_SIZE;
            }
        }

        let mut metadata_sha256 = None;
        if flags & FILE_FLAG_WITH_METADATA_EXT != 0 {
            if at + RECORD_SIZE > limit {
                return Err(ShardError::Truncated(at));
            }
            let bytes: [u8; 32] = data[at..at + 32].try_into().expect("32-byte slice");
            metadata_sha256 = Some(bytes);
            at += RECORD_SIZE;
        }

        blocks.push(FileBlock {
            file_hash,
            entries,
            verification,
            metadata_sha256,
        });
    }
}

fn parse_cas_blocks(
    data: &[u8],
    mut at: usize,
    limit: usize,
) -> Result<(Vec<CasBlock>, usize), ShardError> {
    let mut blocks = Vec::new();

    loop {
        if at + RECORD_SIZE > limit {
            return Err(ShardError::MissingBookend("cas-info"));
        }
        if is_bookend(data, at) {
            return Ok((blocks, at + RECORD_SIZE));
        }

        let xorb_hash = get_hash(data, at)?;
        let cas_flags = get_u32(data, at + 32)?;
        let num_entries = get_u32(data, at + 36)? as usize;
        let num_bytes_in_cas = get_u32(data, at + 40)?;
        let num_bytes_on_disk = get_u32(data, at + 44)?;
        at += RECORD_SIZE;

        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            if at + RECORD_SIZE > limit {
                return Err(ShardError::Truncated(at));
            }
            entries.push(CasChunkEntry {
                chunk_hash: get_hash(data, at)?,
                chunk_byte_range_start: get_u32(data, at + 32)?,
                unpacked_segment_bytes: get_u32(data, at + 36)?,
                flags: get_u32(data, at + 40)?,
            });
            at += RECORD_SIZE;
        }

        blocks.push(CasBlock {
            xorb_hash,
            cas_flags,
            entries,
            num_bytes_in_cas,
            num_bytes_on_disk,
        });
    }
}

fn parse_footer(data: &[u8], at: usize) -> Result<ShardFooter, ShardError> {
    let version = get_u64(data, at)?;
    if version != SHARD_FOOTER_VERSION {
        return Err(ShardError::UnsupportedFooterVersion(version));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(
        data.get(at + 72..at + 104)
            .ok_or(ShardError::Truncated(at + 72))?,
    );

    Ok(ShardFooter {
        file_info_offset: get_u64(data, at + 8)?,
        cas_info_offset: get_u64(data, at + 16)?,
        file_lookup_offset: get_u64(data, at + 24)?,
        file_lookup_num_entries: get_u64(data, at + 32)?,
        cas_lookup_offset: get_u64(data, at + 40)?,
        cas_lookup_num_entries: get_u64(data, at + 48)?,
        chunk_lookup_offset: get_u64(data, at + 56)?,
        chunk_lookup_num_entries: get_u64(data, at + 64)?,
        chunk_hash_key: XetHash::from(key_bytes),
        shard_creation_timestamp: get_u64(data, at + 104)?,
        shard_key_expiry: get_u64(data, at + 112)?,
        stored_bytes_on_disk: get_u64(data, at + 168)?,
        materialized_bytes: get_u64(data, at + 176)?,
        stored_bytes: get_u64(data, at + 184)?,
        footer_offset: get_u64(data, at + 192)?,
    })
}

fn parse_lookups(data: &[u8], footer: &ShardFooter) -> Result<ShardLookups, ShardError> {
    let mut lookups = ShardLookups::default();

    let mut at = footer.file_lookup_offset as usize;
    for _ in 0..footer.file_lookup_num_entries {
        lookups.file_lookup.push(FileLookupEntry {
            trunc_hash: get_u64(data, at)?,
            file_index: get_u32(data, at + 8)?,
        });
        at += 12;
    }

    let mut at = footer.cas_lookup_offset as usize;
    for _ in 0..footer.cas_lookup_num_entries {
        lookups.cas_lookup.push(CasLookupEntry {
            trunc_hash: get_u64(data, at)?,
            cas_index: get_u32(data, at + 8)?,
        });
        at += 12;
    }

    let mut at = footer.chunk_lookup_offset as usize;
    for _ in 0..footer.chunk_lookup_num_entries {
        lookups.chunk_lookup.push(ChunkLookupEntry {
            trunc_hash: get_u64(data, at)?,
            cas_index: get_u32(data, at + 8)?,
            chunk_index: get_u32(data, at + 12)?,
        });
        at += 16;
    }

    if !lookups.file_lookup.windows(2).all(|w| w[0] <= w[1])
        || !lookups.cas_lookup.windows(2).all(|w| w[0] <= w[1])
        || !lookups.chunk_lookup.windows(2).all(|w| w[0] <= w[1])
    {
        return Err(ShardError::InconsistentFooter("lookup table not sorted"));
    }

    Ok(lookups)
}

/// Parse a shard in either form.
///
/// The 17-byte magic sequence and both format versions are hard gates; the
/// application id is checked as well since this engine only ever exchanges
/// shards with its own deployment.
pub fn parse_shard(data: &[u8]) -> Result<Shard, ShardError> {
    if data.len() < RECORD_SIZE {
        return Err(ShardError::Truncated(data.len()));
    }

    if data[15..32] != SHARD_MAGIC_SEQUENCE {
        return Err(ShardError::BadMagic);
    }
    if data[0..14] != SHARD_APPLICATION_ID[..] || data[14] != 0 {
        let mut id = [0u8; 14];
        id.copy_from_slice(&data[0..14]);
        return Err(ShardError::BadApplicationId(id));
    }

    let version = get_u64(data, 32)?;
    if version != SHARD_HEADER_VERSION {
        return Err(ShardError::UnsupportedHeaderVersion(version));
    }

    let footer_size = get_u64(data, 40)? as usize;
    let (footer, limit) = match footer_size {
        0 => (None, data.len()),
        SHARD_FOOTER_SIZE => {
            let at = data
                .len()
                .checked_sub(SHARD_FOOTER_SIZE)
                .ok_or(ShardError::Truncated(data.len()))?;
            let footer = parse_footer(data, at)?;
            if footer.footer_offset != at as u64 {
                return Err(ShardError::InconsistentFooter(
                    "footer offset field disagrees with position",
                ));
            }
            (Some(footer), at)
        }
        other => return Err(ShardError::InvalidFooterSize(other as u64)),
    };

    let (file_blocks, at) = parse_file_blocks(data, RECORD_SIZE, limit)?;
    let (cas_blocks, _at) = parse_cas_blocks(data, at, limit)?;

    let lookups = match &footer {
        Some(footer) => Some(parse_lookups(data, footer)?),
        None => None,
    };

    Ok(Shard {
        file_blocks,
        cas_blocks,
        footer,
        lookups,
    })
}
