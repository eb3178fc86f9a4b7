//! Binary codec for the xorb container.
//!
//! Serialized layout, top to bottom:
//!
//! ```text
//! [chunk region]   per chunk: 8-byte header + compressed payload
//! [footer]         CasObjectInfo: idents, xorb hash, chunk hashes, boundaries
//! [info_length]    u32 LE, byte length of the footer excluding this field
//! ```
//!
//! Chunk header (8 bytes): version (1), compressed size (u24 LE),
//! compression scheme (1), uncompressed size (u24 LE). All size fields are
//! validated before any allocation or decompression.

use bytes::Bytes;
use xet_types::constants::{MAX_CHUNK_SIZE, MAX_XORB_CHUNKS};
use xet_types::XetHash;

use crate::compression::CompressionScheme;
use crate::error::XorbError;

/// Chunk header format version. Anything else is rejected.
const CHUNK_HEADER_VERSION: u8 = 0;

const XORB_IDENT: [u8; 7] = *b"XETBLOB";
const XORB_VERSION: u8 = 1;

const HASH_SECTION_IDENT: [u8; 7] = *b"XBLBHSH";
const HASH_SECTION_VERSION: u8 = 0;

const BOUNDARY_SECTION_IDENT: [u8; 7] = *b"XBLBBND";
const BOUNDARY_SECTION_VERSION: u8 = 1;

/// A chunk staged for serialization into a xorb.
#[derive(Debug, Clone)]
pub struct XorbChunk {
    /// Keyed hash of the uncompressed bytes.
    pub hash: XetHash,
    /// Uncompressed chunk bytes.
    pub data: Bytes,
    /// Compression scheme to attempt for this chunk.
    pub scheme: CompressionScheme,
}

/// The self-describing footer of a serialized xorb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasObjectInfo {
    /// Aggregated hash of the xorb's chunks.
    pub xorb_hash: XetHash,
    /// Per-chunk hashes, in chunk order.
    pub chunk_hashes: Vec<XetHash>,
    /// End offset of each chunk within the serialized chunk region.
    ///
    /// Chunk `i` occupies `[boundaries[i-1], boundaries[i])` (with an
    /// implicit 0 for the first chunk), header included.
    pub chunk_boundaries: Vec<u32>,
    /// End offset of each chunk in the uncompressed stream.
    pub unpacked_boundaries: Vec<u32>,
}

impl CasObjectInfo {
    /// Number of chunks described by the footer.
    pub fn num_chunks(&self) -> usize {
        self.chunk_hashes.len()
    }

    /// Uncompressed size of chunk `index`.
    pub fn chunk_size(&self, index: usize) -> u32 {
        let start = if index == 0 {
            0
        } else {
            self.unpacked_boundaries[index - 1]
        };
        self.unpacked_boundaries[index] - start
    }

    /// Serialized byte span of chunks `[start, end)` within the chunk region.
    ///
    /// Both ends are region offsets; the span covers headers and payloads.
    pub fn serialized_span(&self, start: u32, end: u32) -> (u32, u32) {
        let lo = if start == 0 {
            0
        } else {
            self.chunk_boundaries[start as usize - 1]
        };
        (lo, self.chunk_boundaries[end as usize - 1])
    }
}

/// A fully parsed xorb: footer metadata plus decompressed chunks.
#[derive(Debug, Clone)]
pub struct ParsedXorb {
    /// Footer contents, verified against the chunk region.
    pub info: CasObjectInfo,
    /// Decompressed chunk payloads in order.
    pub chunks: Vec<Bytes>,
}

fn write_u24_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

fn read_u24_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], 0])
}

fn read_u32_at(data: &[u8], offset: usize) -> Result<u32, XorbError> {
    let end = offset.checked_add(4).ok_or(XorbError::Truncated(offset))?;
    let bytes = data.get(offset..end).ok_or(XorbError::Truncated(offset))?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
}

/// Serialize chunks into a complete xorb blob.
///
/// Compresses each chunk under its requested scheme (falling back to raw
/// storage when compression does not help), appends the footer, and
/// returns the blob together with the footer metadata.
pub fn serialize_xorb(chunks: &[XorbChunk]) -> Result<(Bytes, CasObjectInfo), XorbError> {
    if chunks.is_empty() {
        return Err(XorbError::InconsistentFooter("xorb must hold at least one chunk"));
    }
    if chunks.len() > MAX_XORB_CHUNKS {
        return Err(XorbError::XorbFull("chunk count limit exceeded"));
    }

    let mut region = Vec::new();
    let mut chunk_boundaries = Vec::with_capacity(chunks.len());
    let mut unpacked_boundaries = Vec::with_capacity(chunks.len());
    let mut unpacked_total: u32 = 0;

    for chunk in chunks {
        let len = chunk.data.len();
        if len == 0 || len > MAX_CHUNK_SIZE {
            return Err(XorbError::InvalidChunkSize {
                field: "uncompressed_size",
                value: len as u64,
            });
        }

        let (payload, applied) = chunk.scheme.compress(&chunk.data);

        region.push(CHUNK_HEADER_VERSION);
        write_u24_le(&mut region, payload.len() as u32);
        region.push(applied as u8);
        write_u24_le(&mut region, len as u32);
        region.extend_from_slice(&payload);

        chunk_boundaries.push(region.len() as u32);
        unpacked_total += len as u32;
        unpacked_boundaries.push(unpacked_total);
    }

    let entries: Vec<(XetHash, u64)> = chunks
        .iter()
        .map(|c| (c.hash, c.data.len() as u64))
        .collect();
    let xorb_hash = xet_hash::xorb_hash(&entries);

    let info = CasObjectInfo {
        xorb_hash,
        chunk_hashes: chunks.iter().map(|c| c.hash).collect(),
        chunk_boundaries,
        unpacked_boundaries,
    };

    let mut out = region;
    write_footer(&mut out, &info);
    Ok((Bytes::from(out), info))
}

/// Append the footer and trailing length field to a serialized chunk region.
fn write_footer(out: &mut Vec<u8>, info: &CasObjectInfo) {
    let footer_start = out.len();
    let n = info.num_chunks() as u32;

    out.extend_from_slice(&XORB_IDENT);
    out.push(XORB_VERSION);
    out.extend_from_slice(info.xorb_hash.as_bytes());

    out.extend_from_slice(&HASH_SECTION_IDENT);
    out.push(HASH_SECTION_VERSION);
    out.extend_from_slice(&n.to_le_bytes());
    let hashes_at = out.len();
    for hash in &info.chunk_hashes {
        out.extend_from_slice(hash.as_bytes());
    }

    out.extend_from_slice(&BOUNDARY_SECTION_IDENT);
    out.push(BOUNDARY_SECTION_VERSION);
    out.extend_from_slice(&n.to_le_bytes());
    let boundaries_at = out.len();
    for b in &info.chunk_boundaries {
        out.extend_from_slice(&b.to_le_bytes());
    }
    for b in &info.unpacked_boundaries {
        out.extend_from_slice(&b.to_le_bytes());
    }

    // Trailer: counts and back-offsets for readers that jump straight to
    // the arrays, then 16 reserved bytes.
    let trailer_arrays = |footer_end: usize, at: usize| (footer_end - at) as u32;
    let footer_end = out.len() + 4 + 4 + 4 + 16;
    out.extend_from_slice(&n.to_le_bytes());
    out.extend_from_slice(&trailer_arrays(footer_end, hashes_at).to_le_bytes());
    out.extend_from_slice(&trailer_arrays(footer_end, boundaries_at).to_le_bytes());
    out.extend_from_slice(&[0u8; 16]);

    let info_length = (out.len() - footer_start) as u32;
    out.extend_from_slice(&info_length.to_le_bytes());
}

/// Validate and decode one chunk header at `offset`.
///
/// Returns `(compressed_len, scheme, uncompressed_len)`. Size fields are
/// checked against [`MAX_CHUNK_SIZE`] and the bytes remaining in `data`
/// before anything is allocated.
fn parse_chunk_header(
    data: &[u8],
    offset: usize,
) -> Result<(usize, CompressionScheme, usize), XorbError> {
    let header = data
        .get(offset..offset + 8)
        .ok_or(XorbError::Truncated(offset))?;

    if header[0] != CHUNK_HEADER_VERSION {
        return Err(XorbError::UnknownChunkVersion(header[0]));
    }

    let compressed_len = read_u24_le(&header[1..4]) as usize;
    let scheme = CompressionScheme::from_u8(header[4])?;
    let uncompressed_len = read_u24_le(&header[5..8]) as usize;

    if uncompressed_len == 0 || uncompressed_len > MAX_CHUNK_SIZE {
        return Err(XorbError::InvalidChunkSize {
            field: "uncompressed_size",
            value: uncompressed_len as u64,
        });
    }
    let remaining = data.len() - offset - 8;
    if compressed_len == 0 || compressed_len > MAX_CHUNK_SIZE.min(remaining) {
        return Err(XorbError::InvalidChunkSize {
            field: "compressed_size",
            value: compressed_len as u64,
        });
    }

    Ok((compressed_len, scheme, uncompressed_len))
}

fn expect_ident(data: &[u8], offset: usize, expected: [u8; 7]) -> Result<(), XorbError> {
    let found = data
        .get(offset..offset + 7)
        .ok_or(XorbError::Truncated(offset))?;
    if found != expected.as_slice() {
        return Err(XorbError::BadFooterIdent {
            found: found.try_into().expect("7-byte slice"),
            expected,
        });
    }
    Ok(())
}

fn read_hash_at(data: &[u8], offset: usize) -> Result<XetHash, XorbError> {
    let bytes: [u8; 32] = data
        .get(offset..offset + 32)
        .ok_or(XorbError::Truncated(offset))?
        .try_into()
        .expect("32-byte slice");
    Ok(XetHash::from(bytes))
}

/// Parse the footer of a complete serialized xorb.
///
/// The footer is located from the trailing `info_length` field; every ident
/// and version is checked, and the boundary arrays must be strictly
/// increasing with the last serialized boundary equal to the chunk region
/// length.
pub fn parse_footer(data: &[u8]) -> Result<CasObjectInfo, XorbError> {
    if data.len() < 4 {
        return Err(XorbError::Truncated(data.len()));
    }
    let info_length = read_u32_at(data, data.len() - 4)? as usize;
    let footer_start = data
        .len()
        .checked_sub(4 + info_length)
        .ok_or(XorbError::InconsistentFooter("info_length exceeds blob size"))?;

    let mut at = footer_start;

    expect_ident(data, at, XORB_IDENT)?;
    at += 7;
    let version = *data.get(at).ok_or(XorbError::Truncated(at))?;
    if version != XORB_VERSION {
        return Err(XorbError::UnknownFooterVersion {
            section: "xorb",
            found: version,
        });
    }
    at += 1;
    let xorb_hash = read_hash_at(data, at)?;
    at += 32;

    expect_ident(data, at, HASH_SECTION_IDENT)?;
    at += 7;
    let version = *data.get(at).ok_or(XorbError::Truncated(at))?;
    if version != HASH_SECTION_VERSION {
        return Err(XorbError::UnknownFooterVersion {
            section: "hashes",
            found: version,
        });
    }
    at += 1;
    let num_chunks = read_u32_at(data, at)? as usize;
    at += 4;
    if num_chunks == 0 || num_chunks > MAX_XORB_CHUNKS {
        return Err(XorbError::InconsistentFooter("chunk count out of range"));
    }
    let mut chunk_hashes = Vec::with_capacity(num_chunks);
    for _ in 0..num_chunks {
        chunk_hashes.push(read_hash_at(data, at)?);
        at += 32;
    }

    expect_ident(data, at, BOUNDARY_SECTION_IDENT)?;
    at += 7;
    let version = *data.get(at).ok_or(XorbError::Truncated(at))?;
    if version != BOUNDARY_SECTION_VERSION {
        return Err(XorbError::UnknownFooterVersion {
            section: "boundaries",
            found: version,
        });
    }
    at += 1;
    if read_u32_at(data, at)? as usize != num_chunks {
        return Err(XorbError::InconsistentFooter("section chunk counts disagree"));
    }
    at += 4;

    let mut chunk_boundaries = Vec::with_capacity(num_chunks);
    for _ in 0..num_chunks {
        chunk_boundaries.push(read_u32_at(data, at)?);
        at += 4;
    }
    let mut unpacked_boundaries = Vec::with_capacity(num_chunks);
    for _ in 0..num_chunks {
        unpacked_boundaries.push(read_u32_at(data, at)?);
        at += 4;
    }

    if read_u32_at(data, at)? as usize != num_chunks {
        return Err(XorbError::InconsistentFooter("trailer chunk count disagrees"));
    }
    at += 4 + 4 + 4 + 16;
    if at != footer_start + info_length {
        return Err(XorbError::InconsistentFooter("footer length disagrees with info_length"));
    }

    for pair in chunk_boundaries.windows(2) {
        if pair[1] <= pair[0] {
            return Err(XorbError::InconsistentFooter("chunk boundaries not increasing"));
        }
    }
    for pair in unpacked_boundaries.windows(2) {
        if pair[1] <= pair[0] {
            return Err(XorbError::InconsistentFooter("unpacked boundaries not increasing"));
        }
    }
    if chunk_boundaries.last().copied() != Some(footer_start as u32) {
        return Err(XorbError::InconsistentFooter(
            "last boundary disagrees with chunk region length",
        ));
    }

    Ok(CasObjectInfo {
        xorb_hash,
        chunk_hashes,
        chunk_boundaries,
        unpacked_boundaries,
    })
}

/// Parse and verify a complete serialized xorb.
///
/// Decompresses every chunk, recomputes chunk hashes and the xorb hash,
/// and rejects the blob on any disagreement with the footer.
pub fn parse_xorb(data: &[u8]) -> Result<ParsedXorb, XorbError> {
    let info = parse_footer(data)?;
    let region_len = *info.chunk_boundaries.last().expect("footer has chunks") as usize;

    let mut chunks = Vec::with_capacity(info.num_chunks());
    let mut offset = 0usize;
    let mut unpacked_total = 0u32;

    for (index, &boundary) in info.chunk_boundaries.iter().enumerate() {
        let (compressed_len, scheme, uncompressed_len) = parse_chunk_header(data, offset)?;

        let payload = &data[offset + 8..offset + 8 + compressed_len];
        let chunk = scheme.decompress(payload, uncompressed_len)?;
        if chunk.len() != uncompressed_len {
            return Err(XorbError::LengthMismatch {
                index,
                actual: chunk.len(),
                expected: uncompressed_len,
            });
        }

        offset += 8 + compressed_len;
        if offset != boundary as usize {
            return Err(XorbError::InconsistentFooter("chunk end disagrees with boundary array"));
        }
        unpacked_total += uncompressed_len as u32;
        if info.unpacked_boundaries[index] != unpacked_total {
            return Err(XorbError::InconsistentFooter(
                "unpacked size disagrees with boundary array",
            ));
        }

        let computed = xet_hash::chunk_hash(&chunk);
        if computed != info.chunk_hashes[index] {
            return Err(XorbError::HashMismatch {
                computed,
                stored: info.chunk_hashes[index],
            });
        }

        chunks.push(Bytes::from(chunk));
    }

    if offset != region_len {
        return Err(XorbError::Truncated(offset));
    }

    let entries: Vec<(XetHash, u64)> = info
        .chunk_hashes
        .iter()
        .zip(&chunks)
        .map(|(h, c)| (*h, c.len() as u64))
        .collect();
    let computed = xet_hash::xorb_hash(&entries);
    if computed != info.xorb_hash {
        return Err(XorbError::HashMismatch {
            computed,
            stored: info.xorb_hash,
        });
    }

    Ok(ParsedXorb { info, chunks })
}

/// Extract and decompress chunks `[start, end)` from a serialized chunk
/// region (or a byte range of one that begins at a chunk header).
///
/// Indices are relative to the first chunk present in `data`. Used on
/// ranged fetches, which carry no footer.
pub fn extract_chunk_range(data: &[u8], start: u32, end: u32) -> Result<Vec<Bytes>, XorbError> {
    let mut chunks = Vec::with_capacity(end.saturating_sub(start) as usize);
    let mut offset = 0usize;
    let mut index = 0u32;

    while index < end {
        if offset >= data.len() {
            return Err(XorbError::Truncated(offset));
        }
        let (compressed_len, scheme, uncompressed_len) = parse_chunk_header(data, offset)?;
        let payload = &data[offset + 8..offset + 8 + compressed_len];

        if index >= start {
            let chunk = scheme.decompress(payload, uncompressed_len)?;
            if chunk.len() != uncompressed_len {
                return Err(XorbError::LengthMismatch {
                    index: index as usize,
                    actual: chunk.len(),
                    expected: uncompressed_len,
                });
            }
            chunks.push(Bytes::from(chunk));
        }

        offset += 8 + compressed_len;
        index += 1;
    }

    Ok(chunks)
}
