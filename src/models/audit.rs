//! Audit trail records.

use super::{LeaseId, MemoryId, Principal};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// A lease covered the request.
    Granted,
    /// No lease covered the request, or the attempt failed before a grant.
    Denied,
}

impl AuditAction {
    /// Returns the stored form of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    /// Parses a stored action.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown actions.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(Error::InvalidInput(format!("unknown audit action '{other}'"))),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one retrieval attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Unique record ID.
    pub id: String,
    /// Principal whose memories were requested.
    pub principal: Principal,
    /// Lease that covered the request (absent when denied before a lease was found).
    pub lease_id: Option<LeaseId>,
    /// Requesting entity.
    pub entity: String,
    /// Decision.
    pub action: AuditAction,
    /// Free-text reason.
    pub reason: String,
    /// Original request prompt.
    pub prompt: String,
    /// Effective source filter used for the search.
    pub source_filter: Option<String>,
    /// Memories actually returned.
    pub accessed_memories: Vec<MemoryId>,
    /// Ledger transaction mirroring this decision, if any.
    pub ledger_tx: Option<String>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Number of memories returned by the attempt.
    #[must_use]
    pub fn memory_count(&self) -> usize {
        self.accessed_memories.len()
    }
}

/// Aggregate access statistics for a principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    /// Total recorded attempts.
    pub total_accesses: u64,
    /// Attempts granted.
    pub granted: u64,
    /// Attempts denied.
    pub denied: u64,
    /// Sum of memory counts over granted attempts.
    pub memories_accessed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_roundtrip() {
        for action in [AuditAction::Granted, AuditAction::Denied] {
            assert_eq!(AuditAction::parse(action.as_str()).unwrap(), action);
        }
        assert!(AuditAction::parse("maybe").is_err());
    }

    #[test]
    fn test_memory_count_is_derived() {
        let record = AuditRecord {
            id: "a1".to_string(),
            principal: Principal::parse("0xabc").unwrap(),
            lease_id: None,
            entity: "assistant1".to_string(),
            action: AuditAction::Granted,
            reason: "ok".to_string(),
            prompt: "q".to_string(),
            source_filter: None,
            accessed_memories: vec![MemoryId::new("m1"), MemoryId::new("m2")],
            ledger_tx: None,
            created_at: Utc::now(),
        };
        assert_eq!(record.memory_count(), 2);
    }
}
