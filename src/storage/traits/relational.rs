//! Relational store traits.
//!
//! The relational store is the queryable projection of the ledger: it is
//! authoritative for audit rows and memories, and for lease *queryability*
//! (the ledger stays authoritative for lease existence).

use crate::Result;
use crate::models::{AuditRecord, AuditStats, Lease, LeaseId, Memory, MemoryId, Principal};

/// Lease rows and the principal registry.
pub trait LeaseStore: Send + Sync {
    /// Records a principal the first time it is seen. Existing rows are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn touch_principal(&self, principal: &Principal) -> Result<()>;

    /// Inserts a lease row keyed by its ledger-issued id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the id already exists.
    fn insert_lease(&self, lease: &Lease) -> Result<()>;

    /// Fetches a lease row by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_lease(&self, id: &LeaseId) -> Result<Option<Lease>>;

    /// Lists a principal's leases, newest-created first (ties by id ascending).
    ///
    /// Revoked rows are included only when `include_revoked` is set. Expired
    /// rows are always included; activity is evaluated by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn list_leases(&self, principal: &Principal, include_revoked: bool) -> Result<Vec<Lease>>;

    /// Marks an unrevoked lease revoked. Returns `false` if no unrevoked row
    /// matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn mark_revoked(&self, id: &LeaseId, revoked_at: u64, revocation_tx: &str) -> Result<bool>;
}

/// Audit rows.
pub trait AuditStore: Send + Sync {
    /// Appends an audit record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_audit(&self, record: &AuditRecord) -> Result<()>;

    /// Returns up to `limit` records for `principal`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn audit_trail(&self, principal: &Principal, limit: usize) -> Result<Vec<AuditRecord>>;

    /// Aggregates a principal's audit rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn audit_stats(&self, principal: &Principal) -> Result<AuditStats>;
}

/// Result of inserting a memory under the fingerprint constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted(MemoryId),
    /// A memory with the same fingerprint already exists.
    Duplicate(MemoryId),
}

impl InsertOutcome {
    /// Returns the id of the stored memory.
    #[must_use]
    pub const fn memory_id(&self) -> &MemoryId {
        match self {
            Self::Inserted(id) | Self::Duplicate(id) => id,
        }
    }

    /// Returns true if the insert was a duplicate.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Memory rows, attached images and chunk mappings.
pub trait MemoryStore: Send + Sync {
    /// Inserts a memory with its images unless one with the same
    /// (principal, fingerprint) exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_memory(&self, memory: &Memory) -> Result<InsertOutcome>;

    /// Loads the principal's memories among `ids`, images included.
    ///
    /// Unknown ids, and ids owned by another principal, are silently absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_memories(&self, principal: &Principal, ids: &[MemoryId]) -> Result<Vec<Memory>>;

    /// Records chunk index to vector id mappings for a memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn record_chunks(&self, memory_id: &MemoryId, chunks: &[(u32, u64)]) -> Result<()>;

    /// Counts the principal's memories.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn count_memories(&self, principal: &Principal) -> Result<usize>;
}
