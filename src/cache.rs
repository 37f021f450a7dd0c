//! # Basket Cache
//!
//! Memoizes decompressed basket payloads across repeated and overlapping
//! reads. Entries are keyed by (file path, basket seek): the seek is the
//! basket's byte position in the file, unique across every branch of the
//! file and known from the basket table alone, without touching the basket
//! body. A branch-local key such as the last-entry index would collide
//! between sibling branches that share basket boundaries.
//!
//! The cache is byte-bounded and concurrent. Any entry may be evicted at any
//! time; a miss is always correctness-neutral, the caller re-fetches and
//! re-decompresses. Files are immutable once written, so entries never go
//! stale and no invalidation is required (an explicit [`BasketCache::evict`]
//! exists for tests and memory-pressure hooks).

use std::sync::Arc;

use bytes::Bytes;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

/// Default capacity: 256 MiB of decompressed payload bytes.
pub const DEFAULT_CAPACITY_BYTES: u64 = 256 * 1024 * 1024;

/// Globally unique, stable identity of one basket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasketKey {
    /// Path (or identifier) of the containing file.
    pub path: Arc<str>,
    /// File offset of the basket record. Unique across all branches.
    pub seek: u64,
}

/// Bounded concurrent cache of decompressed basket payloads.
///
/// Cloning is cheap and shares the underlying cache, so one instance can be
/// handed to any number of concurrent builder invocations.
#[derive(Clone)]
pub struct BasketCache {
    inner: Cache<BasketKey, Bytes>,
}

impl BasketCache {
    /// Cache bounded to roughly `capacity_bytes` of payload data.
    pub fn new(capacity_bytes: u64) -> Self {
        let inner = Cache::builder()
            .name("basket-cache")
            .max_capacity(capacity_bytes)
            // Weight each entry by its payload size.
            .weigher(|_, payload: &Bytes| payload.len().min(u32::MAX as usize) as u32)
            .eviction_policy(EvictionPolicy::tiny_lfu())
            .build();
        Self { inner }
    }

    /// Look up a decompressed payload. A miss is never an error.
    pub fn get(&self, key: &BasketKey) -> Option<Bytes> {
        let hit = self.inner.get(key);
        log::trace!(
            "cache {} for {}@{}",
            if hit.is_some() { "hit" } else { "miss" },
            key.path,
            key.seek
        );
        hit
    }

    /// Store a decompressed payload. Racing puts for the same key are
    /// harmless; at most one entry per key is retained.
    pub fn put(&self, key: BasketKey, payload: Bytes) {
        self.inner.insert(key, payload);
    }

    /// Force-evict one entry. Used by tests and memory-pressure hooks; a
    /// subsequent `get` simply misses.
    pub fn evict(&self, key: &BasketKey) {
        self.inner.invalidate(key);
    }

    /// Number of entries currently resident (approximate under concurrency).
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Default for BasketCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str, seek: u64) -> BasketKey {
        BasketKey {
            path: path.into(),
            seek,
        }
    }

    #[test]
    fn get_after_put_returns_stored_payload() {
        let cache = BasketCache::default();
        let payload = Bytes::from_static(b"decompressed");
        cache.put(key("/a.root", 100), payload.clone());
        assert_eq!(cache.get(&key("/a.root", 100)), Some(payload));
        assert_eq!(cache.get(&key("/a.root", 200)), None);
        assert_eq!(cache.get(&key("/b.root", 100)), None);
    }

    #[test]
    fn forced_eviction_becomes_a_miss() {
        let cache = BasketCache::default();
        cache.put(key("/a.root", 7), Bytes::from_static(b"x"));
        cache.evict(&key("/a.root", 7));
        assert_eq!(cache.get(&key("/a.root", 7)), None);
    }

    #[test]
    fn racing_puts_keep_one_entry() {
        let cache = BasketCache::default();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = cache.clone();
                scope.spawn(move || {
                    for i in 0..100u64 {
                        cache.put(key("/a.root", i % 4), Bytes::from_static(b"same"));
                        let _ = cache.get(&key("/a.root", i % 4));
                    }
                });
            }
        });
        assert!(cache.entry_count() <= 4);
        assert_eq!(
            cache.get(&key("/a.root", 0)),
            Some(Bytes::from_static(b"same"))
        );
    }
}
