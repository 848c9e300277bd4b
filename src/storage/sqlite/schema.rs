//! Relational schema.

/// Tables and indexes, created idempotently on open.
///
/// Timestamps are Unix seconds except `audit_records.created_at`, which is
/// milliseconds so that several decisions within one second keep their order.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS principals (
    address TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS leases (
    id TEXT PRIMARY KEY,
    principal TEXT NOT NULL,
    entity TEXT NOT NULL,
    access_specifier TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    revoked INTEGER NOT NULL DEFAULT 0,
    revoked_at INTEGER,
    creation_tx TEXT NOT NULL,
    revocation_tx TEXT
);
CREATE INDEX IF NOT EXISTS idx_leases_principal_revoked
    ON leases(principal, revoked, created_at DESC);

CREATE TABLE IF NOT EXISTS audit_records (
    id TEXT PRIMARY KEY,
    principal TEXT NOT NULL,
    lease_id TEXT,
    entity TEXT NOT NULL,
    action TEXT NOT NULL CHECK (action IN ('granted', 'denied')),
    reason TEXT NOT NULL,
    prompt TEXT NOT NULL,
    source_filter TEXT,
    accessed_memories TEXT NOT NULL,
    memory_count INTEGER NOT NULL,
    ledger_tx TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_principal_created
    ON audit_records(principal, created_at DESC);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    principal TEXT NOT NULL,
    source TEXT NOT NULL,
    conversation_thread TEXT,
    extracted_content TEXT NOT NULL,
    tags TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (principal, fingerprint)
);
CREATE INDEX IF NOT EXISTS idx_memories_principal_source
    ON memories(principal, source);

CREATE TABLE IF NOT EXISTS memory_images (
    memory_id TEXT NOT NULL,
    image_id TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    mime_type TEXT,
    position INTEGER NOT NULL,
    PRIMARY KEY (memory_id, image_id)
);

CREATE TABLE IF NOT EXISTS memory_chunks (
    memory_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    vector_id INTEGER NOT NULL,
    PRIMARY KEY (memory_id, chunk_index)
);
";
