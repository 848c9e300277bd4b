//! Append-only ledger of lease and access events.
//!
//! The ledger is the identity authority for leases: a lease id is whatever
//! the ledger hands back from [`Ledger::create_lease`], and the relational
//! store only materializes it afterwards.
//!
//! | Ledger | Use Case |
//! |--------|----------|
//! | [`LocalLedger`] | Hash-chained in-process log with an optional JSONL journal |
//! | [`HttpLedger`] | Remote ledger gateway over HTTP |
//! | [`ResilientLedger`] | Circuit breaker around either of the above |
//!
//! Writes are never retried: a repeated `create_lease` would mint a second
//! grant, since lease creation has no dedup key.

mod http;
mod local;
mod resilient;

pub use http::HttpLedger;
pub use local::{LedgerEntry, LedgerEvent, LocalLedger};
pub use resilient::{LEDGER_BREAKER_METRICS, ResilientLedger};

use crate::Result;
use crate::models::{AccessSpecifier, AuditAction, LeaseId, MemoryId, Principal};
use serde::{Deserialize, Serialize};

/// What the ledger returns for a new lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseReceipt {
    /// Ledger-assigned lease id.
    pub lease_id: LeaseId,
    /// Creation transaction reference.
    pub tx_hash: String,
    /// Expiry as a Unix timestamp (seconds).
    pub expires_at: u64,
}

/// Append-only system of record for lease and audit events.
pub trait Ledger: Send + Sync {
    /// Records a new lease and returns its authoritative id.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger rejects or cannot be reached. No lease
    /// exists in that case.
    fn create_lease(
        &self,
        principal: &Principal,
        entity: &str,
        access: &AccessSpecifier,
        duration_secs: u64,
    ) -> Result<LeaseReceipt>;

    /// Records a revocation and returns its transaction reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger rejects or cannot be reached.
    fn revoke_lease(&self, lease_id: &LeaseId) -> Result<String>;

    /// Returns whether the ledger considers the lease active.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be reached.
    fn is_active(&self, lease_id: &LeaseId) -> Result<bool>;

    /// Mirrors an access decision, returning a transaction reference when
    /// the ledger issued one.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger rejects or cannot be reached.
    fn record_audit(
        &self,
        principal: &Principal,
        lease_id: &LeaseId,
        entity: &str,
        action: AuditAction,
        memory_ids: &[MemoryId],
    ) -> Result<Option<String>>;

    /// Returns the backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;
}
