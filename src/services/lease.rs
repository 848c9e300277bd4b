//! Lease lifecycle.
//!
//! Writes go Ledger, then relational store, then cache. The ledger issues the
//! lease id, so nothing is written locally until it has answered. A failure
//! after the ledger write is an inconsistency window: the lease exists on
//! the ledger but may be missing from the store or the cache.

use crate::ledger::Ledger;
use crate::models::{AccessSpecifier, Lease, LeaseId, LeaseStatus, Principal};
use crate::storage::{CacheBackend, LeaseStore};
use crate::{Error, Result, current_timestamp};
use std::sync::Arc;
use tracing::instrument;

/// Seconds per lease day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Longest lease that can be granted.
pub const MAX_LEASE_DAYS: u32 = 3_650;

fn record_lease_metric(operation: &'static str, status: &'static str) {
    metrics::counter!(
        "lease_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

fn validate_entity(entity: &str) -> Result<String> {
    let entity = entity.trim();
    if entity.is_empty() {
        return Err(Error::InvalidInput("entity cannot be empty".to_string()));
    }
    Ok(entity.to_string())
}

fn validate_lease_id(lease_id: &str) -> Result<LeaseId> {
    let lease_id = lease_id.trim();
    if lease_id.is_empty() {
        return Err(Error::InvalidInput("lease id cannot be empty".to_string()));
    }
    Ok(LeaseId::new(lease_id))
}

/// Owns lease creation, revocation and lookup.
pub struct LeaseManager {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn LeaseStore>,
    cache: Arc<dyn CacheBackend>,
}

impl LeaseManager {
    /// Creates a lease manager over its three collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn LeaseStore>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            ledger,
            store,
            cache,
        }
    }

    /// Grants `entity` access to `principal`'s memories for `duration_days`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for a malformed principal, entity, access
    ///   specifier or duration. Nothing is written.
    /// - The ledger's error if it rejects the lease. Nothing is written.
    /// - [`Error::Inconsistency`] if the ledger accepted the lease but the
    ///   relational store could not materialize it.
    ///
    /// A failed cache write is logged and does not fail the call.
    #[instrument(skip(self), fields(operation = "create_lease"))]
    pub fn create_lease(
        &self,
        principal: &str,
        entity: &str,
        access_specifier: &str,
        duration_days: u32,
    ) -> Result<LeaseId> {
        let principal = Principal::parse(principal)?;
        let entity = validate_entity(entity)?;
        let access = AccessSpecifier::parse(access_specifier)?;
        if duration_days == 0 || duration_days > MAX_LEASE_DAYS {
            return Err(Error::InvalidInput(format!(
                "duration must be between 1 and {MAX_LEASE_DAYS} days, got {duration_days}"
            )));
        }
        let duration_secs = u64::from(duration_days) * SECONDS_PER_DAY;

        let receipt = self
            .ledger
            .create_lease(&principal, &entity, &access, duration_secs)
            .inspect_err(|e| {
                tracing::warn!(error = %e, "Ledger rejected lease");
                record_lease_metric("create", "ledger_error");
            })?;

        let now = current_timestamp();
        let lease = Lease {
            id: receipt.lease_id,
            principal,
            entity,
            access_specifier: access,
            created_at: now,
            expires_at: receipt.expires_at,
            revoked: false,
            revoked_at: None,
            creation_tx: receipt.tx_hash,
            revocation_tx: None,
        };

        let materialized = self
            .store
            .touch_principal(&lease.principal)
            .and_then(|()| self.store.insert_lease(&lease));
        if let Err(e) = materialized {
            tracing::error!(
                lease.id = %lease.id,
                principal = %lease.principal,
                error = %e,
                "Lease is on the ledger but was not stored"
            );
            record_lease_metric("create", "inconsistent");
            return Err(Error::Inconsistency {
                lease_id: lease.id.to_string(),
                cause: e.to_string(),
            });
        }

        self.cache_lease(&lease, now);
        record_lease_metric("create", "success");
        tracing::info!(
            lease.id = %lease.id,
            principal = %lease.principal,
            entity = %lease.entity,
            access = %lease.access_specifier,
            expires_at = lease.expires_at,
            "Lease created"
        );
        Ok(lease.id)
    }

    /// Revokes a lease owned by `principal`.
    ///
    /// Ownership and revocability are checked against the relational store
    /// before the ledger is called.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the lease is absent, owned by someone else or
    ///   already revoked.
    /// - The ledger's or store's error if either write fails.
    #[instrument(skip(self), fields(operation = "revoke_lease"))]
    pub fn revoke_lease(&self, lease_id: &str, principal: &str) -> Result<()> {
        let principal = Principal::parse(principal)?;
        let lease_id = validate_lease_id(lease_id)?;

        let owned = self
            .store
            .get_lease(&lease_id)?
            .filter(|lease| lease.principal == principal && !lease.revoked);
        if owned.is_none() {
            record_lease_metric("revoke", "not_found");
            return Err(Error::NotFound(format!(
                "no revocable lease '{lease_id}' for principal '{principal}'"
            )));
        }

        let revocation_tx = self.ledger.revoke_lease(&lease_id).inspect_err(|e| {
            tracing::warn!(lease.id = %lease_id, error = %e, "Ledger rejected revocation");
            record_lease_metric("revoke", "ledger_error");
        })?;

        if !self
            .store
            .mark_revoked(&lease_id, current_timestamp(), &revocation_tx)?
        {
            // Revoked concurrently between the ownership check and the update.
            record_lease_metric("revoke", "not_found");
            return Err(Error::NotFound(format!("lease '{lease_id}' already revoked")));
        }

        if let Err(e) = self.cache.delete(&lease_id.cache_key()) {
            tracing::warn!(lease.id = %lease_id, error = %e, "Failed to evict revoked lease from cache");
            record_lease_metric("cache_evict", "error");
        }

        record_lease_metric("revoke", "success");
        tracing::info!(lease.id = %lease_id, principal = %principal, "Lease revoked");
        Ok(())
    }

    /// Lists the principal's unrevoked, unexpired leases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_active_leases(&self, principal: &Principal) -> Result<Vec<Lease>> {
        let now = current_timestamp();
        Ok(self
            .store
            .list_leases(principal, false)?
            .into_iter()
            .filter(|lease| lease.is_active_at(now))
            .collect())
    }

    /// Lists every lease row for the principal with its activity evaluated.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is malformed or the store fails.
    pub fn list_leases(&self, principal: &str, include_revoked: bool) -> Result<Vec<LeaseStatus>> {
        let principal = Principal::parse(principal)?;
        let now = current_timestamp();
        Ok(self
            .store
            .list_leases(&principal, include_revoked)?
            .into_iter()
            .map(|lease| LeaseStatus::evaluate(lease, now))
            .collect())
    }

    /// Cache-only validity check.
    ///
    /// A cache miss means "not currently provable as valid" and is reported
    /// as [`Error::NotFound`] without consulting the relational store. Use
    /// [`Self::check_lease`] when the store should be consulted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] on a miss or an inactive cached lease, or
    /// the cache's error if it cannot be reached.
    #[instrument(skip(self), fields(operation = "is_lease_valid"))]
    pub fn is_lease_valid(&self, lease_id: &str) -> Result<LeaseStatus> {
        let lease_id = validate_lease_id(lease_id)?;
        let now = current_timestamp();
        match self.cached_lease(&lease_id)? {
            Some(lease) if lease.is_active_at(now) => Ok(LeaseStatus::evaluate(lease, now)),
            _ => Err(Error::NotFound(format!("lease '{lease_id}' is not valid"))),
        }
    }

    /// Looks a lease up in the cache, falling back to the relational store.
    ///
    /// A cache hit is confirmed against the store, so a revocation whose
    /// cache eviction failed is still reported. An active lease found only in
    /// the store is written back to the cache with its remaining lifetime.
    /// Inactive leases are returned with `is_active = false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no row exists, or the store's error.
    #[instrument(skip(self), fields(operation = "check_lease"))]
    pub fn check_lease(&self, lease_id: &str) -> Result<LeaseStatus> {
        let lease_id = validate_lease_id(lease_id)?;
        let now = current_timestamp();

        match self.cached_lease(&lease_id) {
            Ok(Some(lease)) => return Ok(self.confirm_cached(lease, now)),
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(lease.id = %lease_id, error = %e, "Cache lookup failed, using store");
            },
        }

        let lease = self
            .store
            .get_lease(&lease_id)?
            .ok_or_else(|| Error::NotFound(format!("lease '{lease_id}' not found")))?;
        if lease.is_active_at(now) {
            self.cache_lease(&lease, now);
        }
        Ok(LeaseStatus::evaluate(lease, now))
    }

    fn cached_lease(&self, lease_id: &LeaseId) -> Result<Option<Lease>> {
        let Some(raw) = self.cache.get(&lease_id.cache_key())? else {
            return Ok(None);
        };
        match serde_json::from_str::<Lease>(&raw) {
            Ok(lease) if lease.id == *lease_id => Ok(Some(lease)),
            Ok(_) | Err(_) => {
                tracing::warn!(lease.id = %lease_id, "Discarding malformed cache entry");
                if let Err(e) = self.cache.delete(&lease_id.cache_key()) {
                    tracing::debug!(error = %e, "Failed to delete malformed cache entry");
                }
                Ok(None)
            },
        }
    }

    /// Re-reads a cached lease from the store, which is authoritative for
    /// revocation. A stale entry left behind by a failed eviction is dropped.
    fn confirm_cached(&self, cached: Lease, now: u64) -> LeaseStatus {
        match self.store.get_lease(&cached.id) {
            Ok(Some(stored)) => {
                if !stored.is_active_at(now) {
                    tracing::warn!(lease.id = %stored.id, "Evicting cached lease the store reports inactive");
                    if let Err(e) = self.cache.delete(&stored.id.cache_key()) {
                        tracing::debug!(error = %e, "Failed to evict stale cache entry");
                    }
                }
                LeaseStatus::evaluate(stored, now)
            },
            Ok(None) => LeaseStatus::evaluate(cached, now),
            Err(e) => {
                tracing::warn!(lease.id = %cached.id, error = %e, "Store lookup failed, using cached lease");
                LeaseStatus::evaluate(cached, now)
            },
        }
    }

    /// Writes the lease to the cache for its remaining lifetime.
    fn cache_lease(&self, lease: &Lease, now: u64) {
        let ttl = lease.remaining_secs(now);
        if ttl == 0 {
            return;
        }
        let cached = serde_json::to_string(lease)
            .map_err(|e| Error::OperationFailed {
                operation: "encode_cached_lease".to_string(),
                cause: e.to_string(),
            })
            .and_then(|value| self.cache.set(&lease.id.cache_key(), &value, ttl));
        if let Err(e) = cached {
            tracing::warn!(lease.id = %lease.id, error = %e, "Failed to cache lease");
            record_lease_metric("cache_write", "error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LocalLedger;
    use crate::storage::{MemoryCache, SqliteStore};

    struct FailingCache;

    impl CacheBackend for FailingCache {
        fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
            Err(Error::OperationFailed {
                operation: "cache_set".to_string(),
                cause: "down".to_string(),
            })
        }

        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::OperationFailed {
                operation: "cache_get".to_string(),
                cause: "down".to_string(),
            })
        }

        fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    /// Reads and writes normally but cannot evict.
    struct StickyCache {
        inner: MemoryCache,
    }

    impl CacheBackend for StickyCache {
        fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
            self.inner.set(key, value, ttl_secs)
        }

        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn delete(&self, _key: &str) -> Result<bool> {
            Err(Error::OperationFailed {
                operation: "cache_delete".to_string(),
                cause: "down".to_string(),
            })
        }

        fn backend_name(&self) -> &'static str {
            "sticky"
        }
    }

    struct Fixture {
        manager: LeaseManager,
        ledger: Arc<LocalLedger>,
        store: Arc<SqliteStore>,
        cache: Arc<MemoryCache>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(LocalLedger::in_memory());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = Arc::new(MemoryCache::default());
        let manager = LeaseManager::new(ledger.clone(), store.clone(), cache.clone());
        Fixture {
            manager,
            ledger,
            store,
            cache,
        }
    }

    #[test]
    fn test_create_then_valid_then_revoked() {
        let f = fixture();
        let id = f
            .manager
            .create_lease("0xABC", "assistant1", "global", 7)
            .unwrap();

        let status = f.manager.is_lease_valid(id.as_str()).unwrap();
        assert!(status.is_active);
        assert_eq!(status.lease.principal.as_str(), "0xabc");
        assert!(status.lease.expires_at >= status.lease.created_at + 7 * SECONDS_PER_DAY - 1);
        assert!(f.ledger.is_active(&id).unwrap());

        f.manager.revoke_lease(id.as_str(), "0xabc").unwrap();
        assert!(matches!(
            f.manager.is_lease_valid(id.as_str()),
            Err(Error::NotFound(_))
        ));
        assert!(!f.ledger.is_active(&id).unwrap());
    }

    #[test]
    fn test_create_rejects_bad_input_before_ledger() {
        let f = fixture();
        assert!(matches!(
            f.manager.create_lease("0xabc", " ", "global", 7),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.manager.create_lease("0xabc", "assistant1", "global", 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.manager.create_lease("0xabc", "assistant1", "", 7),
            Err(Error::InvalidInput(_))
        ));
        assert!(f.ledger.entries().is_empty());
    }

    #[test]
    fn test_revoke_twice_is_not_found() {
        let f = fixture();
        let id = f
            .manager
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();
        f.manager.revoke_lease(id.as_str(), "0xabc").unwrap();
        assert!(matches!(
            f.manager.revoke_lease(id.as_str(), "0xabc"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_revoke_by_other_principal_skips_ledger() {
        let f = fixture();
        let id = f
            .manager
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();
        let entries_before = f.ledger.entries().len();

        assert!(matches!(
            f.manager.revoke_lease(id.as_str(), "0xdef"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.manager.revoke_lease("missing", "0xabc"),
            Err(Error::NotFound(_))
        ));
        assert_eq!(f.ledger.entries().len(), entries_before);
    }

    #[test]
    fn test_expired_lease_excluded_from_active() {
        let f = fixture();
        let principal = Principal::parse("0xabc").unwrap();
        f.store
            .insert_lease(&Lease {
                id: LeaseId::new("expired"),
                principal: principal.clone(),
                entity: "assistant1".to_string(),
                access_specifier: AccessSpecifier::Global,
                created_at: 1,
                expires_at: 2,
                revoked: false,
                revoked_at: None,
                creation_tx: "tx".to_string(),
                revocation_tx: None,
            })
            .unwrap();
        f.manager
            .create_lease("0xabc", "assistant1", "claude", 7)
            .unwrap();

        let active = f.manager.list_active_leases(&principal).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].access_specifier.as_str(), "claude");

        let all = f.manager.list_leases("0xabc", true).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|s| !s.is_active && s.lease.id.as_str() == "expired"));
    }

    #[test]
    fn test_cache_miss_is_invalid_but_check_falls_back() {
        let f = fixture();
        let id = f
            .manager
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();
        f.cache.delete(&id.cache_key()).unwrap();

        assert!(matches!(
            f.manager.is_lease_valid(id.as_str()),
            Err(Error::NotFound(_))
        ));

        let status = f.manager.check_lease(id.as_str()).unwrap();
        assert!(status.is_active);
        // The fallback rebuilt the cache entry.
        assert!(f.manager.is_lease_valid(id.as_str()).is_ok());
    }

    #[test]
    fn test_check_lease_reports_revoked() {
        let f = fixture();
        let id = f
            .manager
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();
        f.manager.revoke_lease(id.as_str(), "0xabc").unwrap();

        let status = f.manager.check_lease(id.as_str()).unwrap();
        assert!(!status.is_active);
        assert!(status.lease.revoked);
        assert!(status.lease.revocation_tx.is_some());
        assert!(f.cache.get(&id.cache_key()).unwrap().is_none());
    }

    #[test]
    fn test_cache_failure_does_not_fail_create() {
        let ledger = Arc::new(LocalLedger::in_memory());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let manager = LeaseManager::new(ledger, store, Arc::new(FailingCache));

        let id = manager
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();
        assert!(manager.is_lease_valid(id.as_str()).is_err());
        assert!(manager.check_lease(id.as_str()).unwrap().is_active);
    }

    #[test]
    fn test_malformed_cache_entry_is_discarded() {
        let f = fixture();
        let id = f
            .manager
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();
        f.cache.set(&id.cache_key(), "{not json", 60).unwrap();

        assert!(f.manager.is_lease_valid(id.as_str()).is_err());
        assert!(f.cache.get(&id.cache_key()).unwrap().is_none());
    }

    #[test]
    fn test_check_lease_sees_revocation_despite_stale_cache() {
        let ledger = Arc::new(LocalLedger::in_memory());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = Arc::new(StickyCache {
            inner: MemoryCache::default(),
        });
        let manager = LeaseManager::new(ledger, store, cache.clone());

        let id = manager
            .create_lease("0xabc", "assistant1", "global", 7)
            .unwrap();
        manager.revoke_lease(id.as_str(), "0xabc").unwrap();
        assert!(cache.get(&id.cache_key()).unwrap().is_some());

        let status = manager.check_lease(id.as_str()).unwrap();
        assert!(!status.is_active);
        assert!(status.lease.revoked);
    }
}
