//! TTL cache trait.

use crate::Result;

/// Trait for TTL key-value caches.
///
/// The cache is a disposable accelerator: every entry can be rebuilt from the
/// relational store, so callers treat cache errors as non-fatal unless the
/// operation is explicitly cache-only.
pub trait CacheBackend: Send + Sync {
    /// Stores `value` under `key` for `ttl_secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Returns the live value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Removes `key`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Short backend name used in logs and metrics.
    fn backend_name(&self) -> &'static str;
}
