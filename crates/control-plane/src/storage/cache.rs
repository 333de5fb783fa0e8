use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    validator: Option<String>,
    inserted_at: Instant,
}

/// Size-bounded LRU cache whose entries expire after a fixed lifetime.
///
/// Each entry carries the validator (ETag) of the content it was built from
/// so callers can confirm freshness against the backing store before
/// serving it.
pub struct ResultCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Cached value and its validator, unless absent or expired.
    pub fn get(&self, key: &str) -> Option<(V, Option<String>)> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
        };
        if expired {
            entries.pop(key);
            return None;
        }
        entries
            .get(key)
            .map(|entry| (entry.value.clone(), entry.validator.clone()))
    }

    /// Insert or replace, evicting the least recently used entry at capacity.
    pub fn put(&self, key: &str, value: V, validator: Option<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.put(
            key.to_string(),
            CacheEntry {
                value,
                validator,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.pop(key);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
