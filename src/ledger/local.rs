//! Hash-chained local ledger.
//!
//! Stands in for an external ledger. Every event is appended to an in-memory
//! log, and optionally to a JSONL journal, with
//! `tx_hash = sha256(previous_hash | sequence | timestamp | event_json)`.
//! The first entry chains from [`GENESIS_HASH`], so editing or dropping any
//! entry breaks every hash after it.
//!
//! Opening an existing journal replays and verifies it, which keeps lease
//! ids stable across process restarts.

use super::{Ledger, LeaseReceipt};
use crate::models::{AccessSpecifier, AuditAction, LeaseId, MemoryId, Principal};
use crate::storage::metrics::timed;
use crate::{Error, Result, current_timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::instrument;

const BACKEND: &str = "local_ledger";

/// Previous-hash value of the first entry.
pub const GENESIS_HASH: &str = "genesis";

/// A ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A lease was granted.
    LeaseCreated {
        /// Lease id.
        lease_id: LeaseId,
        /// Granting principal.
        principal: Principal,
        /// Grantee.
        entity: String,
        /// Scope.
        access_specifier: AccessSpecifier,
        /// Expiry (Unix seconds).
        expires_at: u64,
    },
    /// A lease was revoked.
    LeaseRevoked {
        /// Lease id.
        lease_id: LeaseId,
    },
    /// An access decision was mirrored.
    AccessRecorded {
        /// Principal whose memories were requested.
        principal: Principal,
        /// Lease the decision was made under.
        lease_id: LeaseId,
        /// Requesting entity.
        entity: String,
        /// Decision.
        action: AuditAction,
        /// Memories returned.
        memory_ids: Vec<MemoryId>,
    },
}

/// One chained ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Zero-based position in the log.
    pub sequence: u64,
    /// Append time (Unix seconds).
    pub timestamp: u64,
    /// The event.
    pub event: LedgerEvent,
    /// Hash of the preceding entry, or [`GENESIS_HASH`].
    pub previous_hash: String,
    /// Hash of this entry.
    pub tx_hash: String,
}

impl LedgerEntry {
    fn compute_hash(
        previous_hash: &str,
        sequence: u64,
        timestamp: u64,
        event: &LedgerEvent,
    ) -> Result<String> {
        let event_json = serde_json::to_string(event).map_err(|e| Error::OperationFailed {
            operation: "ledger_encode_event".to_string(),
            cause: e.to_string(),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(format!("{previous_hash}|{sequence}|{timestamp}|{event_json}").as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, Copy)]
struct LeaseState {
    expires_at: u64,
    revoked: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    leases: HashMap<LeaseId, LeaseState>,
}

impl LedgerState {
    fn last_hash(&self) -> &str {
        self.entries
            .last()
            .map_or(GENESIS_HASH, |entry| entry.tx_hash.as_str())
    }

    fn apply(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::LeaseCreated {
                lease_id,
                expires_at,
                ..
            } => {
                self.leases.insert(
                    lease_id.clone(),
                    LeaseState {
                        expires_at: *expires_at,
                        revoked: false,
                    },
                );
            },
            LedgerEvent::LeaseRevoked { lease_id } => {
                if let Some(state) = self.leases.get_mut(lease_id) {
                    state.revoked = true;
                }
            },
            LedgerEvent::AccessRecorded { .. } => {},
        }
    }
}

/// In-process ledger with a tamper-evident hash chain.
#[derive(Debug)]
pub struct LocalLedger {
    state: Mutex<LedgerState>,
    journal_path: Option<PathBuf>,
}

impl LocalLedger {
    /// Creates an empty, memory-only ledger.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            journal_path: None,
        }
    }

    /// Opens a journal-backed ledger, replaying any existing entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read, an entry does not
    /// parse, or the replayed chain does not verify.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "ledger_create_dir".to_string(),
                cause: e.to_string(),
            })?;
        }

        let mut state = LedgerState::default();
        if path.exists() {
            let entries = read_journal(&path)?;
            verify_entries(&entries)?;
            for entry in &entries {
                state.apply(&entry.event);
            }
            state.entries = entries;
            tracing::debug!(
                path = %path.display(),
                entries = state.entries.len(),
                "Replayed ledger journal"
            );
        }

        Ok(Self {
            state: Mutex::new(state),
            journal_path: Some(path),
        })
    }

    /// Returns the journal path, if any.
    #[must_use]
    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    /// Returns a copy of all entries in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    /// Verifies the hash chain of the in-memory log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] naming the first broken entry.
    pub fn verify_chain(&self) -> Result<()> {
        verify_entries(&self.entries())
    }

    /// Appends an event, journaling it before it becomes visible.
    fn append(&self, event: LedgerEvent) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = state.entries.len() as u64;
        let timestamp = current_timestamp();
        let previous_hash = state.last_hash().to_string();
        let tx_hash = LedgerEntry::compute_hash(&previous_hash, sequence, timestamp, &event)?;

        let entry = LedgerEntry {
            sequence,
            timestamp,
            event,
            previous_hash,
            tx_hash: tx_hash.clone(),
        };

        if let Some(path) = &self.journal_path {
            append_to_journal(path, &entry).map_err(|e| Error::OperationFailed {
                operation: "ledger_append".to_string(),
                cause: e.to_string(),
            })?;
        }

        state.apply(&entry.event);
        state.entries.push(entry);
        Ok(tx_hash)
    }
}

impl Ledger for LocalLedger {
    #[instrument(skip(self, principal, access), fields(operation = "ledger_create_lease", backend = BACKEND, principal = %principal, entity = %entity))]
    fn create_lease(
        &self,
        principal: &Principal,
        entity: &str,
        access: &AccessSpecifier,
        duration_secs: u64,
    ) -> Result<LeaseReceipt> {
        timed(BACKEND, "create_lease", || {
            let lease_id = LeaseId::new(uuid::Uuid::new_v4().to_string());
            let expires_at = current_timestamp().saturating_add(duration_secs);
            let tx_hash = self.append(LedgerEvent::LeaseCreated {
                lease_id: lease_id.clone(),
                principal: principal.clone(),
                entity: entity.to_string(),
                access_specifier: access.clone(),
                expires_at,
            })?;
            Ok(LeaseReceipt {
                lease_id,
                tx_hash,
                expires_at,
            })
        })
    }

    #[instrument(skip(self), fields(operation = "ledger_revoke_lease", backend = BACKEND, lease.id = %lease_id))]
    fn revoke_lease(&self, lease_id: &LeaseId) -> Result<String> {
        timed(BACKEND, "revoke_lease", || {
            let revocable = {
                let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.leases.get(lease_id).is_some_and(|s| !s.revoked)
            };
            if !revocable {
                return Err(Error::NotFound(format!(
                    "lease '{lease_id}' is not revocable on the ledger"
                )));
            }
            self.append(LedgerEvent::LeaseRevoked {
                lease_id: lease_id.clone(),
            })
        })
    }

    fn is_active(&self, lease_id: &LeaseId) -> Result<bool> {
        let now = current_timestamp();
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .leases
            .get(lease_id)
            .is_some_and(|s| !s.revoked && s.expires_at > now))
    }

    #[instrument(skip(self, principal, memory_ids), fields(operation = "ledger_record_audit", backend = BACKEND, lease.id = %lease_id, action = %action))]
    fn record_audit(
        &self,
        principal: &Principal,
        lease_id: &LeaseId,
        entity: &str,
        action: AuditAction,
        memory_ids: &[MemoryId],
    ) -> Result<Option<String>> {
        timed(BACKEND, "record_audit", || {
            self.append(LedgerEvent::AccessRecorded {
                principal: principal.clone(),
                lease_id: lease_id.clone(),
                entity: entity.to_string(),
                action,
                memory_ids: memory_ids.to_vec(),
            })
            .map(Some)
        })
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

fn verify_entries(entries: &[LedgerEntry]) -> Result<()> {
    let mut expected_previous = GENESIS_HASH.to_string();
    for (i, entry) in entries.iter().enumerate() {
        let broken = |cause: String| Error::OperationFailed {
            operation: "ledger_verify_chain".to_string(),
            cause,
        };
        if entry.sequence != i as u64 {
            return Err(broken(format!(
                "entry {i} has sequence {}",
                entry.sequence
            )));
        }
        if entry.previous_hash != expected_previous {
            return Err(broken(format!(
                "entry {i} chain broken: expected previous '{expected_previous}', got '{}'",
                entry.previous_hash
            )));
        }
        let recomputed = LedgerEntry::compute_hash(
            &entry.previous_hash,
            entry.sequence,
            entry.timestamp,
            &entry.event,
        )?;
        if recomputed != entry.tx_hash {
            return Err(broken(format!("entry {i} has invalid hash")));
        }
        expected_previous.clone_from(&entry.tx_hash);
    }
    Ok(())
}

fn read_journal(path: &Path) -> Result<Vec<LedgerEntry>> {
    let file = File::open(path).map_err(|e| Error::OperationFailed {
        operation: "ledger_open_journal".to_string(),
        cause: e.to_string(),
    })?;
    let mut entries = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::OperationFailed {
            operation: "ledger_read_journal".to_string(),
            cause: e.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| Error::OperationFailed {
            operation: "ledger_read_journal".to_string(),
            cause: format!("line {}: {e}", line_no + 1),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn append_to_journal(path: &Path, entry: &LedgerEntry) -> std::io::Result<()> {
    use std::fs::OpenOptions;

    // Set permissions at creation time so the file is never world-readable.
    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(path)?
    };

    #[cfg(not(unix))]
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let json = serde_json::to_string(entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(file, "{json}")?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn principal() -> Principal {
        Principal::parse("0xabc").unwrap()
    }

    #[test]
    fn test_create_lease_issues_unique_ids() {
        let ledger = LocalLedger::in_memory();
        let a = ledger
            .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 60)
            .unwrap();
        let b = ledger
            .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 60)
            .unwrap();
        assert_ne!(a.lease_id, b.lease_id);
        assert_ne!(a.tx_hash, b.tx_hash);
        assert!(ledger.is_active(&a.lease_id).unwrap());
    }

    #[test]
    fn test_revoke_once() {
        let ledger = LocalLedger::in_memory();
        let receipt = ledger
            .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 60)
            .unwrap();
        ledger.revoke_lease(&receipt.lease_id).unwrap();
        assert!(!ledger.is_active(&receipt.lease_id).unwrap());
        assert!(matches!(
            ledger.revoke_lease(&receipt.lease_id),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            ledger.revoke_lease(&LeaseId::new("missing")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_zero_duration_is_inactive() {
        let ledger = LocalLedger::in_memory();
        let receipt = ledger
            .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 0)
            .unwrap();
        assert!(!ledger.is_active(&receipt.lease_id).unwrap());
    }

    #[test]
    fn test_chain_links_entries() {
        let ledger = LocalLedger::in_memory();
        let receipt = ledger
            .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 60)
            .unwrap();
        let tx = ledger
            .record_audit(
                &principal(),
                &receipt.lease_id,
                "assistant1",
                AuditAction::Granted,
                &[MemoryId::new("m1")],
            )
            .unwrap();

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[1].previous_hash, entries[0].tx_hash);
        assert_eq!(tx.as_deref(), Some(entries[1].tx_hash.as_str()));
        ledger.verify_chain().unwrap();
    }

    #[test]
    fn test_tampering_is_detected() {
        let ledger = LocalLedger::in_memory();
        for _ in 0..3 {
            ledger
                .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 60)
                .unwrap();
        }
        let mut entries = ledger.entries();
        if let LedgerEvent::LeaseCreated { entity, .. } = &mut entries[1].event {
            *entity = "intruder".to_string();
        }
        let err = verify_entries(&entries).unwrap_err();
        assert!(err.to_string().contains("entry 1"));
    }

    #[test]
    fn test_journal_replay_restores_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let receipt = {
            let ledger = LocalLedger::open(&path).unwrap();
            let receipt = ledger
                .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 3600)
                .unwrap();
            ledger
                .create_lease(&principal(), "assistant2", &AccessSpecifier::Global, 3600)
                .unwrap();
            receipt
        };

        let reopened = LocalLedger::open(&path).unwrap();
        assert_eq!(reopened.entries().len(), 2);
        assert!(reopened.is_active(&receipt.lease_id).unwrap());
        reopened.revoke_lease(&receipt.lease_id).unwrap();
        reopened.verify_chain().unwrap();

        let again = LocalLedger::open(&path).unwrap();
        assert!(!again.is_active(&receipt.lease_id).unwrap());
    }

    #[test]
    fn test_corrupted_journal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        {
            let ledger = LocalLedger::open(&path).unwrap();
            ledger
                .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 60)
                .unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("assistant1", "assistant9")).unwrap();
        assert!(LocalLedger::open(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_journal_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let ledger = LocalLedger::open(&path).unwrap();
        ledger
            .create_lease(&principal(), "assistant1", &AccessSpecifier::Global, 60)
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
