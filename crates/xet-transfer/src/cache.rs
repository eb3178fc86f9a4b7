//! LRU cache for decompressed chunks, keyed by chunk hash.
//!
//! Downloads that revisit the same content (overlapping range reads,
//! files sharing chunks) can serve repeats from memory instead of
//! re-fetching and re-decompressing. Bounded by a configurable byte
//! budget; the least recently used entry is evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::debug;
use xet_types::XetHash;

/// Thread-safe LRU cache for chunk data.
///
/// All operations acquire a single lock — fine here because the critical
/// section is pure in-memory work with no I/O.
pub struct ChunkCache {
    max_bytes: u64,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    /// Access order: front = oldest (eviction candidate), back = newest.
    order: VecDeque<XetHash>,
    data: HashMap<XetHash, Bytes>,
    used_bytes: u64,
}

impl ChunkCache {
    /// Create a cache with the given byte limit; 0 disables caching.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(CacheInner {
                order: VecDeque::new(),
                data: HashMap::new(),
                used_bytes: 0,
            }),
        }
    }

    /// Insert a chunk, evicting old entries if needed.
    ///
    /// Chunks larger than the whole budget are not cached.
    pub fn put(&self, hash: XetHash, data: Bytes) {
        let data_len = data.len() as u64;
        if data_len > self.max_bytes {
            return;
        }

        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if let Some(old) = inner.data.remove(&hash) {
            inner.used_bytes -= old.len() as u64;
            inner.order.retain(|h| *h != hash);
        }

        while inner.used_bytes + data_len > self.max_bytes {
            let Some(evict) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.data.remove(&evict) {
                inner.used_bytes -= evicted.len() as u64;
                debug!(%evict, "evicted cached chunk");
            }
        }

        inner.used_bytes += data_len;
        inner.data.insert(hash, data);
        inner.order.push_back(hash);
    }

    /// Look up a chunk and promote it to most-recently-used.
    pub fn get(&self, hash: &XetHash) -> Option<Bytes> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let data = inner.data.get(hash)?.clone();

        inner.order.retain(|h| h != hash);
        inner.order.push_back(*hash);

        Some(data)
    }

    /// Current number of cached chunks.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").data.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bytes held by the cache.
    pub fn used_bytes(&self) -> u64 {
        self.inner.lock().expect("cache lock poisoned").used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &[u8]) -> (XetHash, Bytes) {
        (xet_hash::chunk_hash(data), Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ChunkCache::new(1024);
        let (hash, data) = chunk(b"hello chunk");
        cache.put(hash, data.clone());
        assert_eq!(cache.get(&hash), Some(data));
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = ChunkCache::new(1024);
        assert_eq!(cache.get(&xet_hash::chunk_hash(b"missing")), None);
    }

    #[test]
    fn test_eviction_when_full() {
        let cache = ChunkCache::new(10);
        let (h1, d1) = chunk(b"aaaa");
        let (h2, d2) = chunk(b"bbbb");
        let (h3, d3) = chunk(b"cccc");

        cache.put(h1, d1);
        cache.put(h2, d2.clone());
        cache.put(h3, d3.clone());

        assert!(cache.get(&h1).is_none(), "oldest entry should be evicted");
        assert_eq!(cache.get(&h2), Some(d2));
        assert_eq!(cache.get(&h3), Some(d3));
    }

    #[test]
    fn test_get_promotes_entry() {
        let cache = ChunkCache::new(12);
        let (h1, d1) = chunk(b"aaaa");
        let (h2, d2) = chunk(b"bbbb");
        let (h3, d3) = chunk(b"cccc");

        cache.put(h1, d1.clone());
        cache.put(h2, d2);
        cache.put(h3, d3);
        let _ = cache.get(&h1);

        let (h4, d4) = chunk(b"dddd");
        cache.put(h4, d4);

        assert_eq!(cache.get(&h1), Some(d1), "promoted entry should survive");
        assert!(cache.get(&h2).is_none(), "unpromoted oldest should be evicted");
    }

    #[test]
    fn test_oversize_chunk_not_cached() {
        let cache = ChunkCache::new(4);
        let (hash, data) = chunk(b"way too big");
        cache.put(hash, data);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_budget_disables_cache() {
        let cache = ChunkCache::new(0);
        let (hash, data) = chunk(b"x");
        cache.put(hash, data);
        assert!(cache.get(&hash).is_none());
    }

    #[test]
    fn test_used_bytes_tracked() {
        let cache = ChunkCache::new(1024);
        let (h1, d1) = chunk(b"hello");
        let (h2, d2) = chunk(b"worlds");
        cache.put(h1, d1);
        assert_eq!(cache.used_bytes(), 5);
        cache.put(h2, d2);
        assert_eq!(cache.used_bytes(), 11);
    }
}
