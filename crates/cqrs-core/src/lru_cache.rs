//! # Bounded LRU Cache
//!
//! The single bounded in-memory cache primitive used across the platform: the
//! event store's per-aggregate version cache, and the command bus's idempotency
//! cache. Entries are process-local and advisory — eviction never changes the
//! authoritative answer, only how often the hot path has to ask the store for it.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// An LRU cache with an optional per-entry TTL, bounded by `capacity`.
///
/// Ordering is tracked with a simple `Vec<K>` of most-recently-used keys; this is
/// adequate at the sizes this platform uses caches at (hundreds to low thousands
/// of entries) and keeps the implementation easy to reason about.
pub struct LruCache<K, V> {
    capacity: usize,
    ttl: Option<Duration>,
    entries: HashMap<K, Entry<V>>,
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: None,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new(capacity)
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if let Some(ttl) = self.ttl {
            if let Some(entry) = self.entries.get(key) {
                if entry.inserted_at.elapsed() > ttl {
                    self.entries.remove(key);
                    self.order.retain(|k| k != key);
                    return None;
                }
            }
        }
        if self.entries.contains_key(key) {
            self.touch(key);
        }
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.entries.contains_key(&key) {
            self.touch(&key);
        } else {
            if self.entries.len() >= self.capacity {
                self.evict_lru();
            }
            self.order.push(key.clone());
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn evict_lru(&mut self) {
        if !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache: LruCache<u32, &str> = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        // touch 1, making 2 the least recently used
        assert_eq!(cache.get(&1), Some(&"a"));
        cache.put(3, "c");
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(&"a"));
        assert_eq!(cache.get(&3), Some(&"c"));
    }

    #[test]
    fn ttl_expires_entries() {
        let mut cache: LruCache<&str, i32> = LruCache::with_ttl(10, Duration::from_millis(20));
        cache.put("key", 1);
        assert_eq!(cache.get(&"key"), Some(&1));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"key"), None);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut cache: LruCache<u32, u32> = LruCache::new(3);
        for i in 0..10 {
            cache.put(i, i);
        }
        assert_eq!(cache.len(), 3);
    }
}
