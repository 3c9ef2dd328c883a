//! Bounded, advisory cache of each stream's current version.
//!
//! Populated on first read or write; entries are never treated as authoritative
//! — the append transaction always re-reads `max(stream_version)` itself. This
//! only short-circuits the common "what version is this stream at" lookup.

use std::sync::Mutex;

use cqrs_core::LruCache;
use uuid::Uuid;

pub struct VersionCache {
    inner: Mutex<LruCache<Uuid, i64>>,
}

impl VersionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, stream_id: Uuid) -> Option<i64> {
        self.inner.lock().unwrap().get(&stream_id).copied()
    }

    pub fn put(&self, stream_id: Uuid, version: i64) {
        self.inner.lock().unwrap().put(stream_id, version);
    }

    pub fn invalidate(&self, stream_id: Uuid) {
        self.inner.lock().unwrap().remove(&stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_invalidates() {
        let cache = VersionCache::new(4);
        let stream = Uuid::new_v4();
        assert_eq!(cache.get(stream), None);
        cache.put(stream, 3);
        assert_eq!(cache.get(stream), Some(3));
        cache.invalidate(stream);
        assert_eq!(cache.get(stream), None);
    }
}
