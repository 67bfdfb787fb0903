//! Process-local, TTL-bounded caches shared by the query transformer, router,
//! reasoner, contextual retriever and (future) web-search collaborators.
//!
//! Never promoted across process restarts (spec.md §3 "Lifecycle &
//! ownership"). Built on `moka`'s concurrent map so reads never block writers
//! for long and TTL expiry is checked on access, matching the "concurrent map
//! semantics... with TTL-check on read" requirement of spec.md §5.

use moka::future::Cache;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of a cache's usage, mirroring the teacher's `CacheStats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub len: u64,
    pub hits: u64,
    pub misses: u64,
}

/// A named, TTL-bounded, race-free cache over an owned key/value pair.
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with the given entry cap and time-to-live.
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a cached value, recording a hit/miss for `stats()`.
    pub async fn get(&self, key: &K) -> Option<V> {
        match self.inner.get(key).await {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite an entry, resetting its TTL.
    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    /// Drop a single entry (used when invalidating a stale decision).
    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Clear every entry in the cache.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Current usage snapshot for observability.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.inner.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_hit_and_miss() {
        let cache: TtlCache<String, i32> = TtlCache::new(100, Duration::from_secs(60));

        assert_eq!(cache.get(&"a".to_string()).await, None);
        cache.insert("a".to_string(), 42).await;
        assert_eq!(cache.get(&"a".to_string()).await, Some(42));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_cache_ttl_expiry() {
        let cache: TtlCache<String, i32> = TtlCache::new(100, Duration::from_millis(20));
        cache.insert("a".to_string(), 1).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get(&"a".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_cache_invalidate() {
        let cache: TtlCache<String, i32> = TtlCache::new(100, Duration::from_secs(60));
        cache.insert("a".to_string(), 1).await;
        cache.invalidate(&"a".to_string()).await;
        assert_eq!(cache.get(&"a".to_string()).await, None);
    }
}
