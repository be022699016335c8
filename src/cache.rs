//! Time-bounded memoization.
//!
//! `TtlCache` wraps an LRU map with an absolute per-entry time-to-live.
//! Expired entries are evicted lazily on read; when the cache is full the
//! least-recently-used entry is dropped. Process-lifetime only.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

struct TimedEntry<V> {
    value: V,
    stored_at: Instant,
}

pub struct TtlCache<K: Hash + Eq, V> {
    entries: LruCache<K, TimedEntry<V>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    /// Fetch a live entry, evicting it instead if its TTL has elapsed.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() >= self.ttl,
            None => return None,
        };

        if expired {
            self.entries.pop(key);
            return None;
        }

        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.put(
            key,
            TimedEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_entries_are_returned() {
        let mut cache = TtlCache::new(4, Duration::from_secs(60));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn expired_entries_are_treated_as_absent() {
        let mut cache = TtlCache::new(4, Duration::from_millis(5));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // touch "a" so "b" is the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }
}
