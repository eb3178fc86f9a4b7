//! Keyed hash primitives for the XET object engine.
//!
//! This crate provides:
//! - the four domain-keyed BLAKE3 hashes ([`chunk_hash`], [`file_hash`],
//!   [`verification_hash`], and the internal-node hash used by [`tree`]),
//! - the variable fan-out aggregated hash tree ([`tree::merkle_root`]),
//! - the global-deduplication eligibility predicate and the keyed
//!   match hash used against dedup response shards.
//!
//! All hashes are 256-bit BLAKE3 in keyed mode; the domain keys live in
//! [`xet_types::constants`] and must never change.

pub mod tree;

use xet_types::constants::{DATA_KEY, GLOBAL_DEDUP_MODULUS, VERIFICATION_KEY, ZERO_KEY};
use xet_types::XetHash;

/// Compute a keyed BLAKE3 hash of `data` under the given 32-byte key.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> XetHash {
    XetHash::from(*blake3::keyed_hash(key, data).as_bytes())
}

/// Hash of a chunk's raw bytes.
pub fn chunk_hash(data: &[u8]) -> XetHash {
    keyed_hash(&DATA_KEY, data)
}

/// Hash of a whole file, derived from its chunk hashes and sizes.
///
/// This is the aggregated tree root re-keyed under the zero key, so a file
/// containing exactly one xorb's worth of chunks still hashes differently
/// from that xorb. The empty file hashes to the keyed hash of 32 zero bytes.
pub fn file_hash(chunks: &[(XetHash, u64)]) -> XetHash {
    let root = tree::merkle_root(chunks);
    keyed_hash(&ZERO_KEY, root.as_bytes())
}

/// Hash of a xorb, derived from its chunk hashes and sizes.
pub fn xorb_hash(chunks: &[(XetHash, u64)]) -> XetHash {
    tree::merkle_root(chunks)
}

/// Verification hash over a run of chunk hashes.
///
/// The input is the raw 32-byte hashes concatenated in order — not the
/// string form used by internal tree nodes.
pub fn verification_hash(chunk_hashes: &[XetHash]) -> XetHash {
    let mut buffer = Vec::with_capacity(chunk_hashes.len() * 32);
    for hash in chunk_hashes {
        buffer.extend_from_slice(hash.as_bytes());
    }
    keyed_hash(&VERIFICATION_KEY, &buffer)
}

/// Whether a chunk may be submitted to the global dedup endpoint.
///
/// The first chunk of every file is always eligible; otherwise roughly one
/// chunk in [`GLOBAL_DEDUP_MODULUS`] qualifies, selected by the low bits of
/// the hash tail so the sample is stable across clients.
pub fn is_global_dedup_eligible(hash: &XetHash, is_first_chunk: bool) -> bool {
    is_first_chunk || hash.last_u64() % GLOBAL_DEDUP_MODULUS == 0
}

/// Keyed hash of a chunk hash, used to match against a dedup response
/// shard whose lookup table was built under `key`.
pub fn keyed_chunk_hash(key: &XetHash, chunk_hash: &XetHash) -> XetHash {
    keyed_hash(key.as_bytes(), chunk_hash.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_hash_vector() {
        let hash = chunk_hash(b"Hello World!");
        assert_eq!(
            hash.to_string(),
            "d8d408e608fb9ca213b9909a65d86d725f2de4d8d540324be8a363e7a6e228cb"
        );

        // The raw digest differs from the string form by the per-lane swap.
        let raw: Vec<u8> = hash.as_bytes().to_vec();
        let expected_raw: Vec<u8> = (0..32)
            .map(|i| {
                let hex = "a29cfb08e608d4d8726dd8659a90b9134b3240d5d8e42d5fcb28e2a6e763a3e8";
                u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).unwrap()
            })
            .collect();
        assert_eq!(raw, expected_raw);
    }

    #[test]
    fn test_verification_hash_vector() {
        let parse_raw = |hex: &str| {
            let mut bytes = [0u8; 32];
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).unwrap();
            }
            XetHash::from(bytes)
        };
        let c1 = parse_raw("aad4607a38588fc2777f7cda1c310c209e86f564486186f6694aa1d065f7ebad");
        let c2 = parse_raw("2cce73e063324e6e271e360c77cc780e65ab984b053bdb78220fa74f08fc77e2");

        let vh = verification_hash(&[c1, c2]);
        assert_eq!(
            vh.to_string(),
            "eb06a8ad81d588ac05d1d9a079232d9c1e7d0b07232fa58091caa7bf333a2768"
        );
    }

    #[test]
    fn test_empty_file_hash_is_keyed_zero_root() {
        let empty = file_hash(&[]);
        assert_eq!(empty, keyed_hash(&ZERO_KEY, &[0u8; 32]));
    }

    #[test]
    fn test_file_hash_differs_from_xorb_hash() {
        let chunks = vec![
            (chunk_hash(b"one"), 3u64),
            (chunk_hash(b"two"), 3u64),
            (chunk_hash(b"three"), 5u64),
        ];
        assert_ne!(file_hash(&chunks), xorb_hash(&chunks));
    }

    #[test]
    fn test_first_chunk_always_eligible() {
        // A hash whose tail is certainly not divisible by 1024.
        let mut bytes = [0u8; 32];
        bytes[24] = 1;
        let hash = XetHash::from(bytes);
        assert!(!is_global_dedup_eligible(&hash, false));
        assert!(is_global_dedup_eligible(&hash, true));
    }

    #[test]
    fn test_eligibility_by_hash_tail() {
        // Tail bytes all zero: last_u64 == 0, divisible by anything.
        let hash = XetHash::from([0u8; 32]);
        assert!(is_global_dedup_eligible(&hash, false));
    }

    #[test]
    fn test_keyed_chunk_hash_depends_on_key() {
        let chunk = chunk_hash(b"payload");
        let k1 = XetHash::from([1u8; 32]);
        let k2 = XetHash::from([2u8; 32]);
        assert_ne!(keyed_chunk_hash(&k1, &chunk), keyed_chunk_hash(&k2, &chunk));
    }
}
