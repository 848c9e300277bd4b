//! `SQLite` relational store.
//!
//! One database holds the principal registry, lease rows, audit rows, memories
//! with their image references and the chunk-to-vector mapping. A single
//! [`SqliteStore`] implements [`LeaseStore`], [`AuditStore`] and
//! [`MemoryStore`] over one `Mutex<Connection>`.
//!
//! ## Concurrency Model
//!
//! `rusqlite::Connection` is not `Sync`, so access is serialized through a
//! mutex. WAL mode and `busy_timeout` keep contention with other processes
//! (for example the CLI running alongside a long-lived service) manageable.

mod connection;
mod rows;
mod schema;

pub use connection::{acquire_lock, configure_connection, with_transaction};

use crate::models::{AuditRecord, AuditStats, ImageRef, Lease, LeaseId, Memory, MemoryId, Principal};
use crate::storage::metrics::timed;
use crate::storage::traits::{AuditStore, InsertOutcome, LeaseStore, MemoryStore};
use crate::{Error, Result, current_timestamp};
use rows::{
    AUDIT_COLUMNS, AuditRow, LEASE_COLUMNS, LeaseRow, MEMORY_COLUMNS, MemoryRow, to_sql_ts,
    vector_id_to_sql,
};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite";

fn db_err(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

fn encode_json<T: serde::Serialize + ?Sized>(operation: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `SQLite`-backed relational store.
pub struct SqliteStore {
    /// Protected by a mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (or creates) a database file, creating its parent directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or
    /// the schema cannot be applied.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_data_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        let conn = Connection::open(&db_path).map_err(db_err("open_sqlite"))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open_sqlite_in_memory"))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn);
        conn.execute_batch(schema::SCHEMA)
            .map_err(db_err("create_schema"))
    }

    fn load_images(
        conn: &Connection,
        memory_ids: &[&str],
    ) -> Result<HashMap<String, Vec<ImageRef>>> {
        let sql = format!(
            "SELECT memory_id, image_id, storage_key, mime_type FROM memory_images
             WHERE memory_id IN ({}) ORDER BY memory_id, position",
            placeholders(memory_ids.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err("prepare_load_images"))?;
        let rows = stmt
            .query_map(params_from_iter(memory_ids.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ImageRef {
                        id: row.get(1)?,
                        storage_key: row.get(2)?,
                        mime_type: row.get(3)?,
                    },
                ))
            })
            .map_err(db_err("load_images"))?;

        let mut images: HashMap<String, Vec<ImageRef>> = HashMap::new();
        for row in rows {
            let (memory_id, image) = row.map_err(db_err("load_images"))?;
            images.entry(memory_id).or_default().push(image);
        }
        Ok(images)
    }
}

impl LeaseStore for SqliteStore {
    #[instrument(skip(self), fields(operation = "touch_principal", backend = BACKEND, principal = %principal))]
    fn touch_principal(&self, principal: &Principal) -> Result<()> {
        timed(BACKEND, "touch_principal", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT OR IGNORE INTO principals (address, created_at) VALUES (?1, ?2)",
                params![principal.as_str(), to_sql_ts(current_timestamp())],
            )
            .map_err(db_err("touch_principal"))?;
            Ok(())
        })
    }

    #[instrument(skip(self, lease), fields(operation = "insert_lease", backend = BACKEND, lease.id = %lease.id))]
    fn insert_lease(&self, lease: &Lease) -> Result<()> {
        timed(BACKEND, "insert_lease", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO leases (id, principal, entity, access_specifier, created_at,
                    expires_at, revoked, revoked_at, creation_tx, revocation_tx)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    lease.id.as_str(),
                    lease.principal.as_str(),
                    lease.entity,
                    lease.access_specifier.as_str(),
                    to_sql_ts(lease.created_at),
                    to_sql_ts(lease.expires_at),
                    lease.revoked,
                    lease.revoked_at.map(to_sql_ts),
                    lease.creation_tx,
                    lease.revocation_tx,
                ],
            )
            .map_err(db_err("insert_lease"))?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(operation = "get_lease", backend = BACKEND, lease.id = %id))]
    fn get_lease(&self, id: &LeaseId) -> Result<Option<Lease>> {
        timed(BACKEND, "get_lease", || {
            let conn = acquire_lock(&self.conn);
            let row = conn
                .query_row(
                    &format!("SELECT {LEASE_COLUMNS} FROM leases WHERE id = ?1"),
                    params![id.as_str()],
                    LeaseRow::from_row,
                )
                .optional()
                .map_err(db_err("get_lease"))?;
            row.map(LeaseRow::into_lease).transpose()
        })
    }

    #[instrument(skip(self), fields(operation = "list_leases", backend = BACKEND, principal = %principal))]
    fn list_leases(&self, principal: &Principal, include_revoked: bool) -> Result<Vec<Lease>> {
        timed(BACKEND, "list_leases", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {LEASE_COLUMNS} FROM leases
                     WHERE principal = ?1 AND (?2 OR revoked = 0)
                     ORDER BY created_at DESC, id ASC"
                ))
                .map_err(db_err("prepare_list_leases"))?;
            let rows = stmt
                .query_map(params![principal.as_str(), include_revoked], LeaseRow::from_row)
                .map_err(db_err("list_leases"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("list_leases"))?;
            rows.into_iter().map(LeaseRow::into_lease).collect()
        })
    }

    #[instrument(skip(self, revocation_tx), fields(operation = "mark_revoked", backend = BACKEND, lease.id = %id))]
    fn mark_revoked(&self, id: &LeaseId, revoked_at: u64, revocation_tx: &str) -> Result<bool> {
        timed(BACKEND, "mark_revoked", || {
            let conn = acquire_lock(&self.conn);
            let updated = conn
                .execute(
                    "UPDATE leases SET revoked = 1, revoked_at = ?2, revocation_tx = ?3
                     WHERE id = ?1 AND revoked = 0",
                    params![id.as_str(), to_sql_ts(revoked_at), revocation_tx],
                )
                .map_err(db_err("mark_revoked"))?;
            Ok(updated > 0)
        })
    }
}

impl AuditStore for SqliteStore {
    #[instrument(skip(self, record), fields(operation = "insert_audit", backend = BACKEND, audit.id = %record.id))]
    fn insert_audit(&self, record: &AuditRecord) -> Result<()> {
        timed(BACKEND, "insert_audit", || {
            let accessed: Vec<&str> = record.accessed_memories.iter().map(MemoryId::as_str).collect();
            let accessed = encode_json("encode_accessed_memories", &accessed)?;
            let memory_count = i64::try_from(record.memory_count()).unwrap_or(i64::MAX);

            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO audit_records (id, principal, lease_id, entity, action, reason,
                    prompt, source_filter, accessed_memories, memory_count, ledger_tx, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id,
                    record.principal.as_str(),
                    record.lease_id.as_ref().map(LeaseId::as_str),
                    record.entity,
                    record.action.as_str(),
                    record.reason,
                    record.prompt,
                    record.source_filter,
                    accessed,
                    memory_count,
                    record.ledger_tx,
                    record.created_at.timestamp_millis(),
                ],
            )
            .map_err(db_err("insert_audit"))?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(operation = "audit_trail", backend = BACKEND, principal = %principal))]
    fn audit_trail(&self, principal: &Principal, limit: usize) -> Result<Vec<AuditRecord>> {
        timed(BACKEND, "audit_trail", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_records
                     WHERE principal = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2"
                ))
                .map_err(db_err("prepare_audit_trail"))?;
            let rows = stmt
                .query_map(
                    params![principal.as_str(), i64::try_from(limit).unwrap_or(i64::MAX)],
                    AuditRow::from_row,
                )
                .map_err(db_err("audit_trail"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("audit_trail"))?;
            rows.into_iter().map(AuditRow::into_record).collect()
        })
    }

    #[instrument(skip(self), fields(operation = "audit_stats", backend = BACKEND, principal = %principal))]
    fn audit_stats(&self, principal: &Principal) -> Result<AuditStats> {
        timed(BACKEND, "audit_stats", || {
            let conn = acquire_lock(&self.conn);
            let (total, granted, denied, memories): (i64, i64, i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN action = 'granted' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN action = 'denied' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN action = 'granted' THEN memory_count ELSE 0 END), 0)
                     FROM audit_records WHERE principal = ?1",
                    params![principal.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(db_err("audit_stats"))?;
            let as_u64 = |v: i64| u64::try_from(v).unwrap_or(0);
            Ok(AuditStats {
                total_accesses: as_u64(total),
                granted: as_u64(granted),
                denied: as_u64(denied),
                memories_accessed: as_u64(memories),
            })
        })
    }
}

impl MemoryStore for SqliteStore {
    #[instrument(skip(self, memory), fields(operation = "insert_memory", backend = BACKEND, memory.id = %memory.id))]
    fn insert_memory(&self, memory: &Memory) -> Result<InsertOutcome> {
        timed(BACKEND, "insert_memory", || {
            let tags = encode_json("encode_tags", &memory.tags)?;
            let conn = acquire_lock(&self.conn);
            with_transaction(&conn, |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT id FROM memories WHERE principal = ?1 AND fingerprint = ?2",
                        params![memory.principal.as_str(), memory.fingerprint],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(db_err("find_fingerprint"))?;
                if let Some(id) = existing {
                    return Ok(InsertOutcome::Duplicate(MemoryId::new(id)));
                }

                conn.execute(
                    "INSERT OR IGNORE INTO principals (address, created_at) VALUES (?1, ?2)",
                    params![memory.principal.as_str(), to_sql_ts(current_timestamp())],
                )
                .map_err(db_err("touch_principal"))?;

                conn.execute(
                    "INSERT INTO memories (id, principal, source, conversation_thread,
                        extracted_content, tags, fingerprint, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        memory.id.as_str(),
                        memory.principal.as_str(),
                        memory.source,
                        memory.conversation_thread,
                        memory.extracted_content,
                        tags,
                        memory.fingerprint,
                        to_sql_ts(memory.created_at),
                    ],
                )
                .map_err(db_err("insert_memory"))?;

                for (position, image) in memory.images.iter().enumerate() {
                    conn.execute(
                        "INSERT OR REPLACE INTO memory_images
                            (memory_id, image_id, storage_key, mime_type, position)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            memory.id.as_str(),
                            image.id,
                            image.storage_key,
                            image.mime_type,
                            i64::try_from(position).unwrap_or(i64::MAX),
                        ],
                    )
                    .map_err(db_err("insert_memory_image"))?;
                }

                Ok(InsertOutcome::Inserted(memory.id.clone()))
            })
        })
    }

    #[instrument(skip(self, ids), fields(operation = "get_memories", backend = BACKEND, principal = %principal, count = ids.len()))]
    fn get_memories(&self, principal: &Principal, ids: &[MemoryId]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        timed(BACKEND, "get_memories", || {
            let conn = acquire_lock(&self.conn);
            let sql = format!(
                "SELECT {MEMORY_COLUMNS} FROM memories WHERE principal = ? AND id IN ({})",
                placeholders(ids.len())
            );
            let params = std::iter::once(principal.as_str()).chain(ids.iter().map(MemoryId::as_str));
            let mut stmt = conn.prepare(&sql).map_err(db_err("prepare_get_memories"))?;
            let rows = stmt
                .query_map(params_from_iter(params), MemoryRow::from_row)
                .map_err(db_err("get_memories"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("get_memories"))?;
            if rows.is_empty() {
                return Ok(Vec::new());
            }

            let found: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
            let mut images = Self::load_images(&conn, &found)?;

            rows.into_iter()
                .map(|row| {
                    let attached = images.remove(&row.id).unwrap_or_default();
                    row.into_memory(attached)
                })
                .collect()
        })
    }

    #[instrument(skip(self, chunks), fields(operation = "record_chunks", backend = BACKEND, memory.id = %memory_id, count = chunks.len()))]
    fn record_chunks(&self, memory_id: &MemoryId, chunks: &[(u32, u64)]) -> Result<()> {
        timed(BACKEND, "record_chunks", || {
            let conn = acquire_lock(&self.conn);
            with_transaction(&conn, |conn| {
                for (chunk_index, vector_id) in chunks {
                    conn.execute(
                        "INSERT OR REPLACE INTO memory_chunks (memory_id, chunk_index, vector_id)
                         VALUES (?1, ?2, ?3)",
                        params![memory_id.as_str(), chunk_index, vector_id_to_sql(*vector_id)],
                    )
                    .map_err(db_err("record_chunk"))?;
                }
                Ok(())
            })
        })
    }

    #[instrument(skip(self), fields(operation = "count_memories", backend = BACKEND, principal = %principal))]
    fn count_memories(&self, principal: &Principal) -> Result<usize> {
        timed(BACKEND, "count_memories", || {
            let conn = acquire_lock(&self.conn);
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM memories WHERE principal = ?1",
                    params![principal.as_str()],
                    |row| row.get(0),
                )
                .map_err(db_err("count_memories"))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
    }
}
