//! Row conversion between `SQLite` and the domain models.
//!
//! Rows are read into plain structs first because domain parsing returns the
//! crate error, which cannot be raised from inside a `rusqlite` row closure.

use crate::models::{
    AccessSpecifier, AuditAction, AuditRecord, ImageRef, Lease, LeaseId, Memory, MemoryId,
    Principal,
};
use crate::{Error, Result};
use chrono::DateTime;
use rusqlite::Row;

/// Column list matching [`LeaseRow::from_row`].
pub const LEASE_COLUMNS: &str = "id, principal, entity, access_specifier, created_at, expires_at, \
     revoked, revoked_at, creation_tx, revocation_tx";

/// Column list matching [`AuditRow::from_row`].
pub const AUDIT_COLUMNS: &str = "id, principal, lease_id, entity, action, reason, prompt, \
     source_filter, accessed_memories, ledger_tx, created_at";

/// Column list matching [`MemoryRow::from_row`].
pub const MEMORY_COLUMNS: &str = "id, principal, source, conversation_thread, extracted_content, \
     tags, fingerprint, created_at";

/// Converts a Unix timestamp to its stored form.
pub fn to_sql_ts(ts: u64) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}

/// Converts a stored timestamp back, clamping negatives to zero.
pub fn from_sql_ts(ts: i64) -> u64 {
    u64::try_from(ts).unwrap_or(0)
}

/// Stores a `u64` vector id bit-for-bit in an `INTEGER` column.
pub const fn vector_id_to_sql(id: u64) -> i64 {
    i64::from_ne_bytes(id.to_ne_bytes())
}

fn decode_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::OperationFailed {
        operation: format!("decode_{column}"),
        cause: e.to_string(),
    })
}

/// Raw lease row.
pub struct LeaseRow {
    id: String,
    principal: String,
    entity: String,
    access_specifier: String,
    created_at: i64,
    expires_at: i64,
    revoked: bool,
    revoked_at: Option<i64>,
    creation_tx: String,
    revocation_tx: Option<String>,
}

impl LeaseRow {
    /// Reads a row selected with [`LEASE_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            principal: row.get(1)?,
            entity: row.get(2)?,
            access_specifier: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
            revoked: row.get(6)?,
            revoked_at: row.get(7)?,
            creation_tx: row.get(8)?,
            revocation_tx: row.get(9)?,
        })
    }

    /// Converts into the domain lease.
    pub fn into_lease(self) -> Result<Lease> {
        Ok(Lease {
            id: LeaseId::new(self.id),
            principal: Principal::parse(&self.principal)?,
            entity: self.entity,
            access_specifier: AccessSpecifier::parse(&self.access_specifier)?,
            created_at: from_sql_ts(self.created_at),
            expires_at: from_sql_ts(self.expires_at),
            revoked: self.revoked,
            revoked_at: self.revoked_at.map(from_sql_ts),
            creation_tx: self.creation_tx,
            revocation_tx: self.revocation_tx,
        })
    }
}

/// Raw audit row.
pub struct AuditRow {
    id: String,
    principal: String,
    lease_id: Option<String>,
    entity: String,
    action: String,
    reason: String,
    prompt: String,
    source_filter: Option<String>,
    accessed_memories: String,
    ledger_tx: Option<String>,
    created_at_ms: i64,
}

impl AuditRow {
    /// Reads a row selected with [`AUDIT_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            principal: row.get(1)?,
            lease_id: row.get(2)?,
            entity: row.get(3)?,
            action: row.get(4)?,
            reason: row.get(5)?,
            prompt: row.get(6)?,
            source_filter: row.get(7)?,
            accessed_memories: row.get(8)?,
            ledger_tx: row.get(9)?,
            created_at_ms: row.get(10)?,
        })
    }

    /// Converts into the domain record.
    pub fn into_record(self) -> Result<AuditRecord> {
        let accessed: Vec<String> = decode_json("accessed_memories", &self.accessed_memories)?;
        Ok(AuditRecord {
            id: self.id,
            principal: Principal::parse(&self.principal)?,
            lease_id: self.lease_id.map(LeaseId::new),
            entity: self.entity,
            action: AuditAction::parse(&self.action)?,
            reason: self.reason,
            prompt: self.prompt,
            source_filter: self.source_filter,
            accessed_memories: accessed.into_iter().map(MemoryId::new).collect(),
            ledger_tx: self.ledger_tx,
            created_at: DateTime::from_timestamp_millis(self.created_at_ms).unwrap_or_default(),
        })
    }
}

/// Raw memory row (images are loaded separately).
pub struct MemoryRow {
    pub id: String,
    principal: String,
    source: String,
    conversation_thread: Option<String>,
    extracted_content: String,
    tags: String,
    fingerprint: String,
    created_at: i64,
}

impl MemoryRow {
    /// Reads a row selected with [`MEMORY_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            principal: row.get(1)?,
            source: row.get(2)?,
            conversation_thread: row.get(3)?,
            extracted_content: row.get(4)?,
            tags: row.get(5)?,
            fingerprint: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// Converts into the domain memory with its images attached.
    pub fn into_memory(self, images: Vec<ImageRef>) -> Result<Memory> {
        Ok(Memory {
            tags: decode_json("tags", &self.tags)?,
            id: MemoryId::new(self.id),
            principal: Principal::parse(&self.principal)?,
            source: self.source,
            conversation_thread: self.conversation_thread,
            extracted_content: self.extracted_content,
            fingerprint: self.fingerprint,
            images,
            created_at: from_sql_ts(self.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion_clamps() {
        assert_eq!(to_sql_ts(u64::MAX), i64::MAX);
        assert_eq!(from_sql_ts(-5), 0);
        assert_eq!(from_sql_ts(to_sql_ts(1_700_000_000)), 1_700_000_000);
    }

    #[test]
    fn test_vector_id_keeps_high_bit() {
        let id = u64::MAX - 3;
        let stored = vector_id_to_sql(id);
        assert!(stored < 0);
        assert_eq!(u64::from_ne_bytes(stored.to_ne_bytes()), id);
    }
}
