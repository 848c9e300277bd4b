//! # Memlease
//!
//! Lease-gated access to a principal's stored memories.
//!
//! A principal (a wallet-identified user) grants named external entities
//! (assistants, browser extensions) time-boxed, scoped leases over their
//! memories. Every read goes through the lease that covers it and leaves an
//! immutable audit record behind.
//!
//! ## Architecture
//!
//! - **Ledger**: append-only system of record for lease and audit events
//! - **Relational store**: queryable projection of leases, audits and memories
//! - **Cache**: TTL accelerator for lease lookups, rebuildable from the store
//! - **Vector index**: chunk-level similarity search with payload filtering
//!
//! The [`services::RetrievalService`] ties these together: it resolves the
//! lease, searches the vector index, folds chunk hits back into memories,
//! joins their metadata, ranks them and records the outcome.
//!
//! ## Example
//!
//! ```rust,ignore
//! use memlease::services::{RetrievalRequest, ServiceContainer};
//!
//! let services = ServiceContainer::in_memory()?;
//! let lease_id = services.leases().create_lease("0xabc", "assistant1", "global", 7)?;
//! let results = services.retrieval().retrieve(RetrievalRequest::new(
//!     "0xabc",
//!     "what did I decide about the database?",
//!     "assistant1",
//! ))?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
mod http;
pub mod embedding;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::MemleaseConfig;
pub use embedding::Embedder;
pub use ledger::Ledger;
pub use models::{
    AccessSpecifier, AuditAction, AuditRecord, AuditStats, Lease, LeaseId, Memory, MemoryId,
    Principal, RankedMemory,
};
pub use services::{
    AccessResolver, AuditRecorder, IngestService, LeaseManager, RetrievalService,
    ServiceContainer,
};
pub use storage::{AuditStore, CacheBackend, LeaseStore, MemoryStore, VectorIndex};

/// Error type for memlease operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Missing or malformed request fields, wrong embedding dimensionality |
/// | `AccessDenied` | No lease covers the requested (entity, source) pair |
/// | `NotFound` | Lease absent, not owned by the caller, or already revoked |
/// | `OperationFailed` | Ledger, cache, vector index, relational store or embedding call failed |
/// | `Inconsistency` | Ledger accepted a lease the relational store could not materialize |
/// | `FeatureNotEnabled` | Optional backend requested without its compile-time feature |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised before any external call is made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The access resolver found no lease covering the request.
    ///
    /// The reason enumerates the alternatives that do exist so callers can
    /// tell a missing grant from a mis-scoped one.
    #[error("access denied: {reason}")]
    AccessDenied {
        /// Human-readable denial reason.
        reason: String,
    },

    /// The requested record does not exist for this caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// An upstream operation failed.
    ///
    /// Raised when:
    /// - The ledger rejects or cannot be reached
    /// - `SQLite` operations fail
    /// - The cache or vector index backend errors
    /// - The embedding service fails (retrieval fails closed)
    /// - A circuit breaker is open
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The ledger and the relational store disagree about a lease.
    ///
    /// The lease exists on the ledger but could not be written locally, so
    /// it cannot be listed or revoked through the normal paths.
    #[error("lease '{lease_id}' is on the ledger but not materialized: {cause}")]
    Inconsistency {
        /// Ledger-issued lease identifier.
        lease_id: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

/// Result type alias for memlease operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use memlease::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "ledger_create_lease".to_string(),
            cause: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation 'ledger_create_lease' failed: timeout"
        );

        let err = Error::AccessDenied {
            reason: "no active leases".to_string(),
        };
        assert_eq!(err.to_string(), "access denied: no active leases");

        let err = Error::Inconsistency {
            lease_id: "lease-1".to_string(),
            cause: "disk full".to_string(),
        };
        assert!(err.to_string().contains("lease-1"));
    }
}
