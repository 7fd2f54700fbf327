//! Time-boxed response store with insertion-order eviction.

use super::key::CacheKey;
use crate::config::duration_ms;
use crate::types::ApiResponse;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_entries: 100,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n.max(1);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: ApiResponse,
    stored_at: Instant,
    /// Insertion sequence; matches the entry's slot in `order`.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Insertion order. Slots whose seq no longer matches a live entry are
    /// stale and skipped.
    order: VecDeque<(CacheKey, u64)>,
    next_seq: u64,
}

impl Inner {
    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(k, seq)| entries.get(k).is_some_and(|e| e.seq == *seq));
    }

    /// Remove the oldest-inserted live entry.
    fn evict_oldest(&mut self) -> Option<CacheKey> {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }
}

/// In-memory GET response cache.
///
/// Entries expire `ttl` after they were stored and are purged lazily on
/// lookup. When full, the oldest-inserted entry is evicted. Reads do not
/// refresh an entry's position: this is FIFO, not LRU.
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
    stats: AtomicStats,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            stats: AtomicStats::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, key: &CacheKey) -> Option<ApiResponse> {
        if !self.config.enabled {
            return None;
        }
        let mut inner = self.lock();
        let fresh = match inner.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() < self.config.ttl,
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if !fresh {
            inner.entries.remove(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(url = key.url.as_str(), "cache entry expired");
            return None;
        }
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Store a value. Overwriting a key counts as a fresh insertion.
    pub fn set(&self, key: CacheKey, value: ApiResponse) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.lock();

        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.config.max_entries {
                match inner.evict_oldest() {
                    Some(evicted) => {
                        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(url = evicted.url.as_str(), "cache entry evicted");
                    }
                    None => break,
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((key.clone(), seq));
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
                seq,
            },
        );
        if inner.order.len() > self.config.max_entries.saturating_mul(2) {
            inner.compact();
        }
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every entry whose request URL matches `pattern`. Returns the count.
    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|k, _| !pattern.is_match(&k.url));
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.compact();
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of stored entries, including ones not yet purged after expiry.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestDescriptor;
    use serde_json::json;

    fn key(url: &str) -> CacheKey {
        CacheKey::for_request(&RequestDescriptor::get(url))
    }

    fn resp(n: i64) -> ApiResponse {
        ApiResponse::new(200, json!({ "n": n }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_purges_lazily() {
        let cache = ResponseCache::new(CacheConfig::new().with_ttl(Duration::from_secs(300)));
        cache.set(key("/jobs"), resp(1));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&key("/jobs")), Some(resp(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key("/jobs")), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_fifo_eviction_ignores_reads() {
        let cache = ResponseCache::new(CacheConfig::new().with_max_entries(2));
        cache.set(key("/a"), resp(1));
        cache.set(key("/b"), resp(2));

        // A read would save "/a" under LRU; FIFO still evicts it.
        assert!(cache.get(&key("/a")).is_some());
        cache.set(key("/c"), resp(3));

        assert_eq!(cache.get(&key("/a")), None);
        assert!(cache.get(&key("/b")).is_some());
        assert!(cache.get(&key("/c")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_moves_entry_to_back() {
        let cache = ResponseCache::new(CacheConfig::new().with_max_entries(2));
        cache.set(key("/a"), resp(1));
        cache.set(key("/b"), resp(2));
        cache.set(key("/a"), resp(10));
        assert_eq!(cache.len(), 2);

        cache.set(key("/c"), resp(3));
        assert_eq!(cache.get(&key("/a")), Some(resp(10)));
        assert_eq!(cache.get(&key("/b")), None);
    }

    #[test]
    fn test_reinserted_key_is_not_evicted_by_stale_slot() {
        let cache = ResponseCache::new(CacheConfig::new().with_max_entries(2));
        cache.set(key("/a"), resp(1));
        assert!(cache.invalidate(&key("/a")));
        cache.set(key("/b"), resp(2));
        cache.set(key("/a"), resp(3));
        cache.set(key("/c"), resp(4));

        assert_eq!(cache.get(&key("/b")), None);
        assert_eq!(cache.get(&key("/a")), Some(resp(3)));
    }

    #[test]
    fn test_invalidate_matching() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set(key("/jobs/1"), resp(1));
        cache.set(key("/jobs/2"), resp(2));
        cache.set(key("/proposals/1"), resp(3));

        let removed = cache.invalidate_matching(&Regex::new(r"^/jobs/").unwrap());
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = ResponseCache::new(CacheConfig::new().with_enabled(false));
        cache.set(key("/a"), resp(1));
        assert_eq!(cache.get(&key("/a")), None);
        assert_eq!(cache.len(), 0);
    }
}
