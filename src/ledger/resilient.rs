//! Circuit breaker around a ledger.
//!
//! An open circuit fails fast with [`crate::Error::OperationFailed`]. Calls
//! are never retried.

use super::{Ledger, LeaseReceipt};
use crate::Result;
use crate::models::{AccessSpecifier, AuditAction, LeaseId, MemoryId, Principal};
use crate::storage::resilience::{
    BreakerMetrics, CircuitState, GuardedCalls, StorageResilienceConfig,
};

/// Metric families for ledger calls.
pub const LEDGER_BREAKER_METRICS: BreakerMetrics = BreakerMetrics {
    requests: "ledger_requests_total",
    state: "ledger_circuit_breaker_state",
    operation_prefix: "ledger",
};

/// Ledger wrapper with circuit breaker protection.
pub struct ResilientLedger<L: Ledger> {
    inner: L,
    guard: GuardedCalls,
}

impl<L: Ledger> ResilientLedger<L> {
    /// Wraps a ledger.
    #[must_use]
    pub fn new(inner: L, config: &StorageResilienceConfig) -> Self {
        let guard = GuardedCalls::new(config, inner.backend_name(), LEDGER_BREAKER_METRICS);
        Self { inner, guard }
    }

    /// Returns the current breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.guard.state()
    }
}

impl<L: Ledger> Ledger for ResilientLedger<L> {
    fn create_lease(
        &self,
        principal: &Principal,
        entity: &str,
        access: &AccessSpecifier,
        duration_secs: u64,
    ) -> Result<LeaseReceipt> {
        self.guard.execute("create_lease", || {
            self.inner
                .create_lease(principal, entity, access, duration_secs)
        })
    }

    fn revoke_lease(&self, lease_id: &LeaseId) -> Result<String> {
        self.guard
            .execute("revoke_lease", || self.inner.revoke_lease(lease_id))
    }

    fn is_active(&self, lease_id: &LeaseId) -> Result<bool> {
        self.guard
            .execute("is_active", || self.inner.is_active(lease_id))
    }

    fn record_audit(
        &self,
        principal: &Principal,
        lease_id: &LeaseId,
        entity: &str,
        action: AuditAction,
        memory_ids: &[MemoryId],
    ) -> Result<Option<String>> {
        self.guard.execute("record_audit", || {
            self.inner
                .record_audit(principal, lease_id, entity, action, memory_ids)
        })
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DownLedger {
        calls: AtomicUsize,
    }

    impl Ledger for DownLedger {
        fn create_lease(
            &self,
            _principal: &Principal,
            _entity: &str,
            _access: &AccessSpecifier,
            _duration_secs: u64,
        ) -> Result<LeaseReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::OperationFailed {
                operation: "ledger_create_lease".to_string(),
                cause: "connection refused".to_string(),
            })
        }

        fn revoke_lease(&self, _lease_id: &LeaseId) -> Result<String> {
            Err(Error::NotFound("x".to_string()))
        }

        fn is_active(&self, _lease_id: &LeaseId) -> Result<bool> {
            Ok(false)
        }

        fn record_audit(
            &self,
            _principal: &Principal,
            _lease_id: &LeaseId,
            _entity: &str,
            _action: AuditAction,
            _memory_ids: &[MemoryId],
        ) -> Result<Option<String>> {
            Ok(None)
        }

        fn backend_name(&self) -> &'static str {
            "down"
        }
    }

    #[test]
    fn test_open_circuit_fails_fast() {
        let config = StorageResilienceConfig::default()
            .with_failure_threshold(2)
            .with_reset_timeout_ms(60_000);
        let ledger = ResilientLedger::new(
            DownLedger {
                calls: AtomicUsize::new(0),
            },
            &config,
        );
        let principal = Principal::parse("0xabc").unwrap();

        for _ in 0..3 {
            assert!(
                ledger
                    .create_lease(&principal, "assistant1", &AccessSpecifier::Global, 60)
                    .is_err()
            );
        }
        assert_eq!(ledger.circuit_state(), CircuitState::Open);
        assert_eq!(ledger.inner.calls.load(Ordering::SeqCst), 2);

        let err = ledger
            .create_lease(&principal, "assistant1", &AccessSpecifier::Global, 60)
            .unwrap_err();
        assert!(err.to_string().contains("ledger_create_lease"));
    }

    #[test]
    fn test_not_found_does_not_trip() {
        let config = StorageResilienceConfig::default().with_failure_threshold(1);
        let ledger = ResilientLedger::new(
            DownLedger {
                calls: AtomicUsize::new(0),
            },
            &config,
        );
        assert!(ledger.revoke_lease(&LeaseId::new("x")).is_err());
        assert_eq!(ledger.circuit_state(), CircuitState::Closed);
    }
}
