//! In-process LRU cache with per-entry TTL.

use crate::Result;
use crate::storage::metrics::timed;
use crate::storage::traits::CacheBackend;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::instrument;

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache bounded by an LRU capacity.
///
/// Expired entries are dropped lazily on read. Eviction under capacity
/// pressure only costs a relational lookup later, never correctness.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    /// Default capacity.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Creates a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl CacheBackend for MemoryCache {
    #[instrument(skip(self, value), fields(operation = "cache_set", backend = BACKEND, key = %key))]
    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        timed(BACKEND, "set", || {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if ttl_secs == 0 {
                entries.pop(key);
                return Ok(());
            }
            entries.put(
                key.to_string(),
                CacheEntry {
                    value: value.to_string(),
                    expires_at: Instant::now() + Duration::from_secs(ttl_secs),
                },
            );
            Ok(())
        })
    }

    #[instrument(skip(self), fields(operation = "cache_get", backend = BACKEND, key = %key))]
    fn get(&self, key: &str) -> Result<Option<String>> {
        timed(BACKEND, "get", || {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let live = match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
                Some(_) => None,
                None => return Ok(None),
            };
            if live.is_none() {
                entries.pop(key);
            }
            Ok(live)
        })
    }

    #[instrument(skip(self), fields(operation = "cache_delete", backend = BACKEND, key = %key))]
    fn delete(&self, key: &str) -> Result<bool> {
        timed(BACKEND, "delete", || {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(entries.pop(key).is_some())
        })
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
