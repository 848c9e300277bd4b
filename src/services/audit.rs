//! Audit recording.
//!
//! Every access decision is written to the relational store, which is
//! authoritative. When the decision was made under a lease, it is mirrored
//! to the ledger first, best-effort. Neither write can fail the caller:
//! audit is a side effect, so failures are logged and counted instead.

use crate::ledger::Ledger;
use crate::models::{AuditAction, AuditRecord, AuditStats, LeaseId, MemoryId, Principal};
use crate::storage::AuditStore;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Largest trail page.
pub const MAX_TRAIL_LIMIT: usize = 1_000;

/// An access decision waiting to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDecision {
    /// Principal whose memories were requested.
    pub principal: Principal,
    /// Requesting entity.
    pub entity: String,
    /// Granted or denied.
    pub action: AuditAction,
    /// Free-text reason.
    pub reason: String,
    /// The request prompt.
    pub prompt: String,
    /// Effective source filter.
    pub source_filter: Option<String>,
    /// Lease the decision was made under.
    pub lease_id: Option<LeaseId>,
    /// Memories returned to the caller.
    pub accessed_memories: Vec<MemoryId>,
}

impl AuditDecision {
    /// A grant under `lease_id`.
    #[must_use]
    pub fn granted(
        principal: Principal,
        entity: impl Into<String>,
        prompt: impl Into<String>,
        lease_id: LeaseId,
    ) -> Self {
        Self {
            principal,
            entity: entity.into(),
            action: AuditAction::Granted,
            reason: "lease matched".to_string(),
            prompt: prompt.into(),
            source_filter: None,
            lease_id: Some(lease_id),
            accessed_memories: Vec::new(),
        }
    }

    /// A denial with its reason.
    #[must_use]
    pub fn denied(
        principal: Principal,
        entity: impl Into<String>,
        prompt: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            principal,
            entity: entity.into(),
            action: AuditAction::Denied,
            reason: reason.into(),
            prompt: prompt.into(),
            source_filter: None,
            lease_id: None,
            accessed_memories: Vec::new(),
        }
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sets the effective source filter.
    #[must_use]
    pub fn with_source_filter(mut self, source: Option<String>) -> Self {
        self.source_filter = source;
        self
    }

    /// Sets the lease.
    #[must_use]
    pub fn with_lease(mut self, lease_id: Option<LeaseId>) -> Self {
        self.lease_id = lease_id;
        self
    }

    /// Sets the returned memories.
    #[must_use]
    pub fn with_memories(mut self, memories: Vec<MemoryId>) -> Self {
        self.accessed_memories = memories;
        self
    }
}

/// Writes decision records and answers trail and stats queries.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    ledger: Arc<dyn Ledger>,
}

impl AuditRecorder {
    /// Creates a recorder.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, ledger: Arc<dyn Ledger>) -> Self {
        Self { store, ledger }
    }

    /// Records a decision, returning the audit id.
    ///
    /// Returns `None` when the relational write failed; the failure is
    /// logged and counted in `audit_write_failures_total`.
    #[instrument(
        skip(self, decision),
        fields(
            operation = "record_audit",
            principal = %decision.principal,
            entity = %decision.entity,
            action = %decision.action,
            memory_count = decision.accessed_memories.len()
        )
    )]
    pub fn record(&self, decision: AuditDecision) -> Option<String> {
        metrics::counter!("access_decisions_total", "action" => decision.action.as_str())
            .increment(1);

        let ledger_tx = decision.lease_id.as_ref().and_then(|lease_id| {
            self.ledger
                .record_audit(
                    &decision.principal,
                    lease_id,
                    &decision.entity,
                    decision.action,
                    &decision.accessed_memories,
                )
                .unwrap_or_else(|e| {
                    tracing::warn!(lease.id = %lease_id, error = %e, "Ledger audit mirror failed");
                    None
                })
        });

        let record = AuditRecord {
            id: uuid::Uuid::now_v7().to_string(),
            principal: decision.principal,
            lease_id: decision.lease_id,
            entity: decision.entity,
            action: decision.action,
            reason: decision.reason,
            prompt: decision.prompt,
            source_filter: decision.source_filter,
            accessed_memories: decision.accessed_memories,
            ledger_tx,
            created_at: Utc::now(),
        };

        match self.store.insert_audit(&record) {
            Ok(()) => {
                tracing::info!(
                    audit.id = %record.id,
                    reason = %record.reason,
                    ledger_tx = record.ledger_tx.as_deref().unwrap_or(""),
                    "Access decision recorded"
                );
                Some(record.id)
            },
            Err(e) => {
                metrics::counter!("audit_write_failures_total").increment(1);
                tracing::error!(error = %e, "Failed to write audit record");
                None
            },
        }
    }

    /// Returns up to `limit` records for `principal`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed principal or a limit
    /// outside `1..=1000`, or the store's error.
    pub fn trail(&self, principal: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let principal = Principal::parse(principal)?;
        if limit == 0 || limit > MAX_TRAIL_LIMIT {
            return Err(Error::InvalidInput(format!(
                "limit must be between 1 and {MAX_TRAIL_LIMIT}, got {limit}"
            )));
        }
        self.store.audit_trail(&principal, limit)
    }

    /// Aggregates the principal's decisions.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed principal or a failed read.
    pub fn stats(&self, principal: &str) -> Result<AuditStats> {
        let principal = Principal::parse(principal)?;
        self.store.audit_stats(&principal)
    }
}
