//! `idempotency_key -> CommandResult` cache so a replayed command with the
//! same key returns the cached outcome instead of re-executing. Built on the
//! same bounded LRU primitive the event store uses for its version cache.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cqrs_core::LruCache;

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub aggregate_id: Uuid,
    pub new_version: i64,
}

pub struct IdempotencyCache {
    inner: Mutex<LruCache<String, CommandOutcome>>,
}

impl IdempotencyCache {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(LruCache::with_ttl(capacity, DEFAULT_TTL)) }
    }

    pub fn get(&self, key: &str) -> Option<CommandOutcome> {
        self.inner.lock().expect("idempotency cache mutex poisoned").get(&key.to_string()).cloned()
    }

    pub fn put(&self, key: String, outcome: CommandOutcome) {
        self.inner.lock().expect("idempotency cache mutex poisoned").put(key, outcome);
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayed_key_returns_cached_outcome() {
        let cache = IdempotencyCache::new(10);
        let outcome = CommandOutcome { aggregate_id: Uuid::new_v4(), new_version: 3 };
        cache.put("cmd-1".into(), outcome.clone());
        let replayed = cache.get("cmd-1").unwrap();
        assert_eq!(replayed.new_version, outcome.new_version);
    }

    #[test]
    fn unknown_key_misses() {
        let cache = IdempotencyCache::new(10);
        assert!(cache.get("missing").is_none());
    }
}
