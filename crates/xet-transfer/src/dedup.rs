//! Global deduplication index built from dedup-response shards.
//!
//! A dedup query answers with a stored-form shard. When its footer carries
//! a non-zero `chunk_hash_key`, the shard's chunk lookup table holds keyed
//! hashes: the client finds matches by keying its own chunk hashes and
//! binary-searching, and never learns raw hashes it did not already hold.
//! Key rotation is expressed through `shard_key_expiry`; entries from an
//! expired shard are dead data and are evicted wholesale.

use std::collections::HashMap;

use tracing::{debug, warn};
use xet_shard::{Shard, ShardLookups};
use xet_types::XetHash;

/// Location of a chunk inside a remote xorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteChunk {
    /// The xorb holding the chunk.
    pub xorb_hash: XetHash,
    /// Chunk index within the xorb.
    pub chunk_index: u32,
    /// Uncompressed chunk size in bytes.
    pub size: u32,
}

/// Match index over every dedup-response shard seen this session.
#[derive(Default)]
pub struct DedupIndex {
    /// Local chunk hash → remote location.
    matches: HashMap<XetHash, RemoteChunk>,
    /// Hashes contributed per shard, tagged with that shard's key expiry
    /// (zero = never expires). Drives eviction.
    generations: Vec<(u64, Vec<XetHash>)>,
}

impl DedupIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a dedup-response shard, matching it against `local_chunks`.
    ///
    /// Returns the number of local chunks matched. A shard whose key has
    /// already expired at `now` is ignored.
    pub fn add_shard(&mut self, shard: &Shard, local_chunks: &[XetHash], now: u64) -> usize {
        let (key, expiry) = match &shard.footer {
            Some(footer) => (footer.chunk_hash_key, footer.shard_key_expiry),
            None => (XetHash::ZERO, 0),
        };

        if expiry != 0 && now > expiry {
            warn!(expiry, now, "ignoring dedup shard with expired key");
            return 0;
        }

        let mut contributed = Vec::new();

        if key == XetHash::ZERO {
            // Raw chunk hashes: index the CAS sections directly.
            let mut remote = HashMap::new();
            for block in &shard.cas_blocks {
                for (i, entry) in block.entries.iter().enumerate() {
                    remote.insert(
                        entry.chunk_hash,
                        RemoteChunk {
                            xorb_hash: block.xorb_hash,
                            chunk_index: i as u32,
                            size: entry.unpacked_segment_bytes,
                        },
                    );
                }
            }
            for hash in local_chunks {
                if let Some(location) = remote.get(hash) {
                    if self.matches.insert(*hash, *location).is_none() {
                        contributed.push(*hash);
                    }
                }
            }
        } else {
            // Keyed hashes: key each local hash and search the lookup table.
            // The table is authoritative; truncation collisions are accepted
            // (the oracle is deliberately one-way).
            let owned_lookups;
            let lookups = match &shard.lookups {
                Some(lookups) => lookups,
                None => {
                    owned_lookups =
                        ShardLookups::build(&shard.file_blocks, &shard.cas_blocks, &key);
                    &owned_lookups
                }
            };

            for hash in local_chunks {
                let keyed = xet_hash::keyed_chunk_hash(&key, hash);
                for entry in lookups.find_chunks(keyed.first_u64()) {
                    let Some(block) = shard.cas_blocks.get(entry.cas_index as usize) else {
                        continue;
                    };
                    let Some(chunk) = block.entries.get(entry.chunk_index as usize) else {
                        continue;
                    };
                    let location = RemoteChunk {
                        xorb_hash: block.xorb_hash,
                        chunk_index: entry.chunk_index,
                        size: chunk.unpacked_segment_bytes,
                    };
                    if self.matches.insert(*hash, location).is_none() {
                        contributed.push(*hash);
                    }
                    break;
                }
            }
        }

        let matched = contributed.len();
        if matched > 0 {
            debug!(matched, keyed = (key != XetHash::ZERO), "ingested dedup shard");
            self.generations.push((expiry, contributed));
        }
        matched
    }

    /// Remote location of a local chunk, if any cached shard matched it.
    pub fn lookup(&self, hash: &XetHash) -> Option<&RemoteChunk> {
        self.matches.get(hash)
    }

    /// Number of matched chunks currently indexed.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether the index holds no matches.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Drop every match contributed by a shard whose key expired at `now`.
    pub fn evict_expired(&mut self, now: u64) {
        let mut evicted = 0usize;
        self.generations.retain(|(expiry, hashes)| {
            if *expiry != 0 && now > *expiry {
                for hash in hashes {
                    if self.matches.remove(hash).is_some() {
                        evicted += 1;
                    }
                }
                false
            } else {
                true
            }
        });
        if evicted > 0 {
            debug!(evicted, "evicted expired dedup matches");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xet_shard::ShardBuilder;

    fn hash(seed: u8) -> XetHash {
        xet_hash::chunk_hash(&[seed])
    }

    fn remote_shard(key: XetHash, expiry: u64, chunks: &[(XetHash, u32)]) -> Shard {
        let mut builder = ShardBuilder::new();
        builder.add_cas_block(hash(200), chunks, 1000, |_, _| false);
        let shard = builder.build_stored(key, 1_700_000_000, expiry);

        // Round-trip through the stored codec so lookups are present, the
        // same way a response shard arrives off the wire.
        let bytes = xet_shard::serialize_shard_stored(&shard).unwrap();
        xet_shard::parse_shard(&bytes).unwrap()
    }

    #[test]
    fn test_raw_shard_matches_known_chunks() {
        let chunks = vec![(hash(1), 100), (hash(2), 200), (hash(3), 300)];
        let shard = remote_shard(XetHash::ZERO, 0, &chunks);

        let mut index = DedupIndex::new();
        let locals = vec![hash(2), hash(4)];
        let matched = index.add_shard(&shard, &locals, 1_700_000_100);

        assert_eq!(matched, 1);
        let location = index.lookup(&hash(2)).unwrap();
        assert_eq!(location.chunk_index, 1);
        assert_eq!(location.size, 200);
        assert!(index.lookup(&hash(4)).is_none());
    }

    #[test]
    fn test_keyed_shard_matches_via_keyed_lookup() {
        let key = XetHash::from([0x33; 32]);
        let chunks = vec![(hash(1), 100), (hash(2), 200)];
        let shard = remote_shard(key, 0, &chunks);

        let mut index = DedupIndex::new();
        let matched = index.add_shard(&shard, &[hash(1), hash(2), hash(9)], 1_700_000_100);

        assert_eq!(matched, 2);
        assert_eq!(index.lookup(&hash(1)).unwrap().chunk_index, 0);
        assert_eq!(index.lookup(&hash(2)).unwrap().chunk_index, 1);
        assert!(index.lookup(&hash(9)).is_none());
    }

    #[test]
    fn test_expired_shard_ignored() {
        let key = XetHash::from([0x33; 32]);
        let shard = remote_shard(key, 1_600_000_000, &[(hash(1), 100)]);

        let mut index = DedupIndex::new();
        let matched = index.add_shard(&shard, &[hash(1)], 1_700_000_000);
        assert_eq!(matched, 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_evict_expired_generations() {
        let key = XetHash::from([0x33; 32]);
        let expiring = remote_shard(key, 1_750_000_000, &[(hash(1), 100)]);
        let durable = remote_shard(XetHash::ZERO, 0, &[(hash(2), 200)]);

        let mut index = DedupIndex::new();
        index.add_shard(&expiring, &[hash(1)], 1_700_000_000);
        index.add_shard(&durable, &[hash(2)], 1_700_000_000);
        assert_eq!(index.len(), 2);

        index.evict_expired(1_800_000_000);
        assert!(index.lookup(&hash(1)).is_none(), "expired match evicted");
        assert!(index.lookup(&hash(2)).is_some(), "durable match kept");
    }
}
