//! Lease lifecycle tests over fully in-process backends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use memlease::ledger::LocalLedger;
use memlease::models::{AccessSpecifier, Lease, LeaseId, Principal};
use memlease::services::{AccessDecision, LeaseManager, ServiceContainer};
use memlease::storage::{LeaseStore, MemoryCache, SqliteStore};
use memlease::{Error, current_timestamp};
use std::sync::Arc;

#[test]
fn test_create_check_revoke() {
    let services = ServiceContainer::in_memory().unwrap();
    let leases = services.leases();

    let lease_id = leases
        .create_lease("0xabc", "assistant1", "global", 7)
        .unwrap();

    let status = leases.is_lease_valid(lease_id.as_str()).unwrap();
    assert!(status.is_active);
    assert_eq!(status.lease.entity, "assistant1");
    assert!(status.lease.access_specifier.is_global());

    leases.revoke_lease(lease_id.as_str(), "0xabc").unwrap();

    assert!(matches!(
        leases.is_lease_valid(lease_id.as_str()),
        Err(Error::NotFound(_))
    ));
    let status = leases.check_lease(lease_id.as_str()).unwrap();
    assert!(!status.is_active);
    assert!(status.lease.revoked);
}

#[test]
fn test_revoking_twice_is_not_found() {
    let services = ServiceContainer::in_memory().unwrap();
    let leases = services.leases();
    let lease_id = leases
        .create_lease("0xabc", "assistant1", "claude", 1)
        .unwrap();

    leases.revoke_lease(lease_id.as_str(), "0xabc").unwrap();
    assert!(matches!(
        leases.revoke_lease(lease_id.as_str(), "0xabc"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_revoke_requires_owner() {
    let services = ServiceContainer::in_memory().unwrap();
    let leases = services.leases();
    let lease_id = leases
        .create_lease("0xabc", "assistant1", "global", 1)
        .unwrap();

    assert!(matches!(
        leases.revoke_lease(lease_id.as_str(), "0xdef"),
        Err(Error::NotFound(_))
    ));
    assert!(leases.check_lease(lease_id.as_str()).unwrap().is_active);
}

#[test]
fn test_principal_is_case_insensitive() {
    let services = ServiceContainer::in_memory().unwrap();
    let leases = services.leases();
    let lease_id = leases
        .create_lease("0xABC", "assistant1", "global", 1)
        .unwrap();

    let listed = leases.list_leases("0xabc", false).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].lease.id, lease_id);
    leases.revoke_lease(lease_id.as_str(), " 0xAbC ").unwrap();
}

#[test]
fn test_list_excludes_revoked_unless_asked() {
    let services = ServiceContainer::in_memory().unwrap();
    let leases = services.leases();
    let kept = leases
        .create_lease("0xabc", "assistant1", "global", 1)
        .unwrap();
    let revoked = leases
        .create_lease("0xabc", "assistant2", "global", 1)
        .unwrap();
    leases.revoke_lease(revoked.as_str(), "0xabc").unwrap();

    let active = leases.list_leases("0xabc", false).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].lease.id, kept);

    let all = leases.list_leases("0xabc", true).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn test_expired_lease_is_not_active() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let manager = LeaseManager::new(
        Arc::new(LocalLedger::in_memory()),
        store.clone(),
        Arc::new(MemoryCache::new(16)),
    );
    let principal = Principal::parse("0xabc").unwrap();
    let now = current_timestamp();
    store
        .insert_lease(&Lease {
            id: LeaseId::new("expired-1"),
            principal: principal.clone(),
            entity: "assistant1".to_string(),
            access_specifier: AccessSpecifier::Global,
            created_at: now - 10_000,
            expires_at: now - 100,
            revoked: false,
            revoked_at: None,
            creation_tx: "tx-expired".to_string(),
            revocation_tx: None,
        })
        .unwrap();

    assert!(manager.list_active_leases(&principal).unwrap().is_empty());
    let status = manager.check_lease("expired-1").unwrap();
    assert!(!status.is_active);
    assert!(matches!(
        manager.is_lease_valid("expired-1"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_cache_miss_is_not_valid_but_store_fallback_finds_it() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let ledger = Arc::new(LocalLedger::in_memory());
    let creator = LeaseManager::new(ledger.clone(), store.clone(), Arc::new(MemoryCache::new(16)));
    let lease_id = creator
        .create_lease("0xabc", "assistant1", "global", 1)
        .unwrap();

    // Same store, cold cache.
    let cold = LeaseManager::new(ledger, store, Arc::new(MemoryCache::new(16)));
    assert!(matches!(
        cold.is_lease_valid(lease_id.as_str()),
        Err(Error::NotFound(_))
    ));
    assert!(cold.check_lease(lease_id.as_str()).unwrap().is_active);
    // The fallback repopulates the cache.
    assert!(cold.is_lease_valid(lease_id.as_str()).unwrap().is_active);
}

#[test]
fn test_invalid_create_inputs() {
    let services = ServiceContainer::in_memory().unwrap();
    let leases = services.leases();
    for (principal, entity, access, days) in [
        ("", "assistant1", "global", 7),
        ("0xabc", " ", "global", 7),
        ("0xabc", "assistant1", "", 7),
        ("0xabc", "assistant1", "global", 0),
    ] {
        assert!(matches!(
            leases.create_lease(principal, entity, access, days),
            Err(Error::InvalidInput(_))
        ));
    }
    assert!(leases.list_leases("0xabc", true).unwrap().is_empty());
}

#[test]
fn test_scoped_lease_takes_precedence() {
    let services = ServiceContainer::in_memory().unwrap();
    let leases = services.leases();
    leases
        .create_lease("0xabc", "assistant1", "global", 1)
        .unwrap();
    let scoped = leases
        .create_lease("0xabc", "assistant1", "claude", 1)
        .unwrap();
    let principal = Principal::parse("0xabc").unwrap();

    let decision = services
        .resolver()
        .resolve(&principal, "assistant1", Some("claude"))
        .unwrap();
    assert_eq!(decision.lease().map(|l| l.id.clone()), Some(scoped));
}

#[test]
fn test_scoped_lease_never_grants_unscoped_access() {
    let services = ServiceContainer::in_memory().unwrap();
    services
        .leases()
        .create_lease("0xabc", "assistant1", "claude", 1)
        .unwrap();
    let principal = Principal::parse("0xabc").unwrap();

    let decision = services
        .resolver()
        .resolve(&principal, "assistant1", None)
        .unwrap();
    assert!(matches!(decision, AccessDecision::Denied(reason) if reason.contains("claude")));
}
