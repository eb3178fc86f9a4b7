//! Shared types and protocol constants for the XET object engine.
//!
//! This crate defines the 32-byte [`XetHash`] value used to address chunks,
//! xorbs, and files, the protocol-wide constants ([`constants`]), and the
//! data types exchanged with a CAS endpoint during reconstruction
//! ([`reconstruction`]).

pub mod constants;
pub mod reconstruction;

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte content hash in the XET addressing scheme.
///
/// The same value type addresses chunks, xorbs, and files; the role is
/// determined by which keyed hash produced it. The [`fmt::Display`] form is
/// the protocol string representation: the 32 bytes are read as four
/// little-endian u64 words, each printed as 16 lowercase hex digits. This
/// encoding is load-bearing — it appears verbatim inside internal-node hash
/// inputs — so `Display` and [`FromStr`] are the only string codec, and
/// serde uses it too (hashes travel as strings in API payloads).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct XetHash([u8; 32]);

impl Serialize for XetHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for XetHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

impl XetHash {
    /// The all-zero hash, used as the Merkle root of an empty input.
    pub const ZERO: XetHash = XetHash([0u8; 32]);

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The first 8 bytes as a little-endian u64.
    ///
    /// This is the truncated key stored in shard lookup tables.
    pub fn first_u64(&self) -> u64 {
        u64::from_le_bytes(self.0[0..8].try_into().expect("8-byte slice"))
    }

    /// The last 8 bytes as a little-endian u64.
    ///
    /// Used by the tree cut predicate and the global-dedup eligibility test.
    pub fn last_u64(&self) -> u64 {
        u64::from_le_bytes(self.0[24..32].try_into().expect("8-byte slice"))
    }
}

impl From<[u8; 32]> for XetHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for XetHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for XetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for lane in self.0.chunks_exact(8) {
            let word = u64::from_le_bytes(lane.try_into().expect("8-byte lane"));
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for XetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XetHash({self})")
    }
}

/// Error parsing the string form of a [`XetHash`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hash string: expected 64 hex digits")]
pub struct ParseHashError;

impl FromStr for XetHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseHashError);
        }

        let mut bytes = [0u8; 32];
        for (i, lane) in bytes.chunks_exact_mut(8).enumerate() {
            let word =
                u64::from_str_radix(&s[i * 16..(i + 1) * 16], 16).map_err(|_| ParseHashError)?;
            lane.copy_from_slice(&word.to_le_bytes());
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_byte_swaps_each_lane() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let hash = XetHash::from(bytes);
        assert_eq!(
            hash.to_string(),
            "07060504030201000f0e0d0c0b0a090817161514131211101f1e1d1c1b1a1918"
        );
    }

    #[test]
    fn test_string_roundtrip() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        let hash = XetHash::from(bytes);
        let parsed: XetHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_string_form_is_64_lowercase_hex() {
        let hash = XetHash::from([0xAB; 32]);
        let s = hash.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(s, s.to_lowercase());
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        assert!("abcd".parse::<XetHash>().is_err());
        assert!("".parse::<XetHash>().is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let s = "zz060504030201000f0e0d0c0b0a090817161514131211101f1e1d1c1b1a1918";
        assert!(s.parse::<XetHash>().is_err());
    }

    #[test]
    fn test_first_and_last_u64() {
        let mut bytes = [0u8; 32];
        bytes[0..8].copy_from_slice(&42u64.to_le_bytes());
        bytes[24..32].copy_from_slice(&7u64.to_le_bytes());
        let hash = XetHash::from(bytes);
        assert_eq!(hash.first_u64(), 42);
        assert_eq!(hash.last_u64(), 7);
    }

    #[test]
    fn test_zero_constant() {
        assert_eq!(XetHash::ZERO.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_serde_roundtrip() {
        let hash = XetHash::from([0x5A; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        let back: XetHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
