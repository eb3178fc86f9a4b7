//! Chunk payload compression schemes.
//!
//! Each chunk in a xorb is compressed independently and tagged with a
//! one-byte scheme in its header. LZ4 payloads use the frame format — every
//! chunk is a complete frame. The byte-grouping variant reorders the input
//! so that bytes at equal positions within 4-byte words become adjacent,
//! which helps LZ4 on numeric tensors and similar fixed-stride data.

use std::io::{Read, Write};

use crate::error::XorbError;

/// Compression applied to a single chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionScheme {
    /// Payload stored as-is.
    None = 0,
    /// LZ4 frame.
    Lz4 = 1,
    /// 4-way byte grouping, then LZ4 frame.
    ByteGrouping4Lz4 = 2,
}

impl CompressionScheme {
    /// Decode a scheme from its header tag.
    pub fn from_u8(tag: u8) -> Result<Self, XorbError> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::ByteGrouping4Lz4),
            other => Err(XorbError::UnknownCompressionScheme(other)),
        }
    }
}

/// Regroup `data` so byte `i` lands in bucket `i % 4`, buckets emitted in
/// order. For length 10 the bucket sizes are 3, 3, 2, 2.
pub fn byte_group_4(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for lane in 0..4 {
        out.extend(data.iter().skip(lane).step_by(4));
    }
    out
}

/// Inverse of [`byte_group_4`]; `original_len` must equal the pre-transform
/// length (the transform is length-preserving, so this is `grouped.len()`).
pub fn byte_ungroup_4(grouped: &[u8], original_len: usize) -> Vec<u8> {
    let base = original_len / 4;
    let rem = original_len % 4;

    // Bucket start offsets within the grouped buffer.
    let mut starts = [0usize; 4];
    let mut offset = 0;
    for lane in 0..4 {
        starts[lane] = offset;
        offset += base + usize::from(lane < rem);
    }

    let mut out = Vec::with_capacity(original_len);
    for i in 0..original_len {
        out.push(grouped[starts[i % 4] + i / 4]);
    }
    out
}

fn lz4_frame_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder.write_all(data).expect("writing to Vec cannot fail");
    encoder.finish().expect("finishing in-memory frame cannot fail")
}

fn lz4_frame_decompress(data: &[u8]) -> Result<Vec<u8>, XorbError> {
    let mut decoder = lz4_flex::frame::FrameDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| XorbError::Lz4(e.to_string()))?;
    Ok(out)
}

impl CompressionScheme {
    /// Compress a chunk payload under this scheme.
    ///
    /// If the compressed form would not be smaller than the input, the
    /// payload is stored raw instead; the returned scheme reflects what was
    /// actually applied and is what belongs in the chunk header.
    pub fn compress(self, data: &[u8]) -> (Vec<u8>, CompressionScheme) {
        let compressed = match self {
            Self::None => return (data.to_vec(), Self::None),
            Self::Lz4 => lz4_frame_compress(data),
            Self::ByteGrouping4Lz4 => lz4_frame_compress(&byte_group_4(data)),
        };

        if compressed.len() >= data.len() {
            (data.to_vec(), Self::None)
        } else {
            (compressed, self)
        }
    }

    /// Decompress a chunk payload stored under this scheme.
    ///
    /// `uncompressed_len` comes from the chunk header and is needed to
    /// invert the byte-grouping transform.
    pub fn decompress(self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>, XorbError> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => lz4_frame_decompress(data),
            Self::ByteGrouping4Lz4 => {
                let grouped = lz4_frame_decompress(data)?;
                Ok(byte_ungroup_4(&grouped, uncompressed_len))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_data(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut state: u32 = 0x1234_5678;
        for _ in 0..size {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            data.push((state >> 16) as u8);
        }
        data
    }

    #[test]
    fn test_scheme_tags_roundtrip() {
        for scheme in [
            CompressionScheme::None,
            CompressionScheme::Lz4,
            CompressionScheme::ByteGrouping4Lz4,
        ] {
            assert_eq!(CompressionScheme::from_u8(scheme as u8).unwrap(), scheme);
        }
        assert!(CompressionScheme::from_u8(3).is_err());
        assert!(CompressionScheme::from_u8(255).is_err());
    }

    #[test]
    fn test_byte_group_layout() {
        let data: Vec<u8> = (0..10).collect();
        let grouped = byte_group_4(&data);
        assert_eq!(grouped, vec![0, 4, 8, 1, 5, 9, 2, 6, 3, 7]);
    }

    #[test]
    fn test_byte_group_multiple_of_four() {
        let data = vec![
            0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x22, 0x23, 0x30, 0x31, 0x32, 0x33,
        ];
        let grouped = byte_group_4(&data);
        assert_eq!(
            grouped,
            vec![0x10, 0x20, 0x30, 0x11, 0x21, 0x31, 0x12, 0x22, 0x32, 0x13, 0x23, 0x33]
        );
    }

    #[test]
    fn test_byte_group_roundtrip_all_lengths() {
        for len in 0..70 {
            let data = test_data(len);
            let grouped = byte_group_4(&data);
            assert_eq!(grouped.len(), data.len());
            assert_eq!(byte_ungroup_4(&grouped, len), data);
        }
    }

    #[test]
    fn test_compress_roundtrip_all_schemes() {
        let compressible: Vec<u8> = (0..40_000u32).map(|i| (i / 100) as u8).collect();
        for scheme in [
            CompressionScheme::None,
            CompressionScheme::Lz4,
            CompressionScheme::ByteGrouping4Lz4,
        ] {
            let (payload, applied) = scheme.compress(&compressible);
            let restored = applied.decompress(&payload, compressible.len()).unwrap();
            assert_eq!(restored, compressible, "scheme {scheme:?}");
        }
    }

    #[test]
    fn test_incompressible_falls_back_to_none() {
        let noise = test_data(8192);
        let (payload, applied) = CompressionScheme::Lz4.compress(&noise);
        assert_eq!(applied, CompressionScheme::None);
        assert_eq!(payload, noise);
    }

    #[test]
    fn test_compressible_shrinks() {
        let zeros = vec![0u8; 64 * 1024];
        let (payload, applied) = CompressionScheme::Lz4.compress(&zeros);
        assert_eq!(applied, CompressionScheme::Lz4);
        assert!(payload.len() < zeros.len() / 10);
    }

    #[test]
    fn test_grouping_helps_strided_data() {
        // Little-endian u32 counter: high bytes are near-constant once
        // grouped, so the grouped variant should not do worse than plain.
        let data: Vec<u8> = (0..16_384u32).flat_map(|i| i.to_le_bytes()).collect();
        let (plain, _) = CompressionScheme::Lz4.compress(&data);
        let (grouped, applied) = CompressionScheme::ByteGrouping4Lz4.compress(&data);
        assert_eq!(applied, CompressionScheme::ByteGrouping4Lz4);
        assert!(grouped.len() <= plain.len() + data.len() / 64);
    }

    #[test]
    fn test_decompress_rejects_garbage_frame() {
        let garbage = vec![0xAB; 100];
        assert!(CompressionScheme::Lz4.decompress(&garbage, 100).is_err());
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let (payload, applied) = CompressionScheme::Lz4.compress(&[]);
        // An empty frame is never smaller than empty input.
        assert_eq!(applied, CompressionScheme::None);
        assert!(payload.is_empty());
        assert_eq!(applied.decompress(&payload, 0).unwrap(), Vec::<u8>::new());
    }
}
