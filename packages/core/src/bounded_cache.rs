//! Bounded caches with TTL and max-size eviction.
//!
//! Used for `processed_driver_state_event_ids` / `processed_cancellation_event_ids`
//! dedup sets, so a delayed event replayed after a subscription re-open cannot
//! be re-applied, and so the dedup sets themselves cannot grow without bound
//! across the lifetime of a long-running peer process.

use std::collections::HashMap;
use std::env;
use std::time::{Duration, Instant};

const DEFAULT_EVENT_ID_CACHE_SIZE: usize = 10_000;
const DEFAULT_PENDING_CACHE_SIZE: usize = 2_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 7_200;

/// Read cache configuration from environment variables with defaults.
pub struct CacheConfig {
    pub event_id_cache_size: usize,
    pub pending_cache_size: usize,
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            event_id_cache_size: env::var("EVENT_ID_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_EVENT_ID_CACHE_SIZE),
            pending_cache_size: env::var("PENDING_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PENDING_CACHE_SIZE),
            ttl_secs: env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Bounded cache for 32-byte ids with TTL and capacity limits.
///
/// - **Max capacity:** Configurable; when full, oldest entry is evicted on insert.
/// - **TTL:** Entries older than TTL are evicted before insertion when at capacity.
pub struct BoundedHashCache {
    map: HashMap<[u8; 32], Instant>,
    max_size: usize,
    ttl: Duration,
}

impl BoundedHashCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_size,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn contains_key(&self, hash: &[u8; 32]) -> bool {
        self.map.get(hash).is_some_and(|&t| t.elapsed() < self.ttl)
    }

    pub fn insert(&mut self, hash: [u8; 32]) {
        let now = Instant::now();
        self.map
            .retain(|_, &mut t| now.duration_since(t) < self.ttl);
        while self.map.len() >= self.max_size && !self.map.is_empty() {
            let oldest = self.map.iter().min_by_key(|(_, t)| *t).map(|(h, _)| *h);
            if let Some(h) = oldest {
                self.map.remove(&h);
            } else {
                break;
            }
        }
        self.map.insert(hash, now);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

/// Bounded cache mapping a 32-byte id to an arbitrary value, with the same
/// TTL and capacity eviction as [`BoundedHashCache`]. Used for in-flight
/// state keyed by ride id or quote id (e.g. pending bridge payments awaiting
/// a Lightning settlement poll).
pub struct BoundedPendingCache<T> {
    map: HashMap<[u8; 32], (T, Instant)>,
    max_size: usize,
    ttl: Duration,
}

impl<T> BoundedPendingCache<T> {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_size,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn get(&self, hash: &[u8; 32]) -> Option<&T> {
        self.map
            .get(hash)
            .filter(|(_, t)| t.elapsed() < self.ttl)
            .map(|(v, _)| v)
    }

    pub fn insert(&mut self, hash: [u8; 32], value: T) {
        let now = Instant::now();
        self.map
            .retain(|_, (_, t)| now.duration_since(*t) < self.ttl);
        while self.map.len() >= self.max_size && !self.map.is_empty() {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, (_, t))| *t)
                .map(|(h, _)| *h);
            if let Some(h) = oldest {
                self.map.remove(&h);
            } else {
                break;
            }
        }
        self.map.insert(hash, (value, now));
    }

    pub fn remove(&mut self, hash: &[u8; 32]) -> Option<T> {
        self.map.remove(hash).map(|(v, _)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8; 32], &T)> {
        self.map.iter().map(|(h, (v, _))| (h, v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_cache_insert_and_contains() {
        let mut cache = BoundedHashCache::new(10, 3600);
        let hash = [1u8; 32];
        assert!(!cache.contains_key(&hash));
        cache.insert(hash);
        assert!(cache.contains_key(&hash));
    }

    #[test]
    fn hash_cache_evicts_oldest() {
        let mut cache = BoundedHashCache::new(3, 3600);
        cache.insert([1u8; 32]);
        cache.insert([2u8; 32]);
        cache.insert([3u8; 32]);
        cache.insert([4u8; 32]);
        assert!(!cache.contains_key(&[1u8; 32]));
        assert!(cache.contains_key(&[4u8; 32]));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn pending_cache_insert_and_get() {
        let mut cache = BoundedPendingCache::new(10, 3600);
        let hash = [1u8; 32];
        cache.insert(hash, "hello");
        assert_eq!(cache.get(&hash), Some(&"hello"));
    }

    #[test]
    fn pending_cache_evicts_oldest() {
        let mut cache = BoundedPendingCache::new(2, 3600);
        cache.insert([1u8; 32], "a");
        cache.insert([2u8; 32], "b");
        cache.insert([3u8; 32], "c");
        assert!(cache.get(&[1u8; 32]).is_none());
        assert_eq!(cache.get(&[3u8; 32]), Some(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn pending_cache_remove() {
        let mut cache = BoundedPendingCache::new(10, 3600);
        cache.insert([1u8; 32], 42);
        assert_eq!(cache.remove(&[1u8; 32]), Some(42));
        assert!(cache.get(&[1u8; 32]).is_none());
    }
}
