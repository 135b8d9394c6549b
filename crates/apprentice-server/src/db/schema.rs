// crates/apprentice-server/src/db/schema.rs
// Database schema: tables, indexes, FTS5 shadows and their triggers

use anyhow::Result;
use rusqlite::Connection;

/// Run all schema setup. Idempotent: every statement is IF NOT EXISTS.
///
/// Vector support is optional; its probe failure is logged and swallowed
/// so the store still works for FTS-only deployments.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    ensure_vector_support(conn);
    Ok(())
}

/// Probe the sqlite-vec extension. Search degrades to FTS without it, so a
/// failure here is a warning, not an error.
fn ensure_vector_support(conn: &Connection) {
    match conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0)) {
        Ok(version) => tracing::debug!("sqlite-vec {} available", version),
        Err(e) => tracing::warn!("vector functions unavailable, vector search disabled: {}", e),
    }
}

/// Database schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- CONTEXTS: registered folders
-- =======================================
CREATE TABLE IF NOT EXISTS contexts (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    path TEXT UNIQUE NOT NULL,
    mounts TEXT NOT NULL DEFAULT '[]',              -- JSON [{path, mount}]
    enabled INTEGER NOT NULL DEFAULT 1,
    include_patterns TEXT NOT NULL DEFAULT '["**/*"]',
    exclude_patterns TEXT NOT NULL DEFAULT '[]',
    registered_at TEXT NOT NULL,
    last_indexed_at TEXT,
    version_provider_type TEXT
);

-- =======================================
-- ASSETS: identity layer, one row per (context, key)
-- =======================================
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,                            -- sha256(context_id ":" key)[..16]
    context_id TEXT NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    extension TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL DEFAULT '',          -- '' when content was not stored
    indexed_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    head_version_ref TEXT,
    UNIQUE(context_id, key)
);
CREATE INDEX IF NOT EXISTS idx_assets_context ON assets(context_id);
CREATE INDEX IF NOT EXISTS idx_assets_hash ON assets(content_hash);

-- =======================================
-- CONTENT: deduplicated blobs + reference counting
-- =======================================
CREATE TABLE IF NOT EXISTS content_store (
    content_hash TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    last_accessed_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS content_refs (
    content_hash TEXT NOT NULL,
    context_id TEXT NOT NULL,
    is_head INTEGER NOT NULL DEFAULT 0,
    version_ref_id TEXT
);
-- at most one head ref per (hash, context)
CREATE UNIQUE INDEX IF NOT EXISTS idx_content_refs_head
    ON content_refs(content_hash, context_id) WHERE is_head = 1;
CREATE INDEX IF NOT EXISTS idx_content_refs_hash ON content_refs(content_hash);

-- =======================================
-- VERSION HISTORY
-- =======================================
CREATE TABLE IF NOT EXISTS version_refs (
    id TEXT NOT NULL,                               -- provider canonical id (e.g. 40-char SHA)
    context_id TEXT NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    ref_type TEXT NOT NULL,                         -- 'commit' | 'tag' | 'branch'
    name TEXT NOT NULL,
    parent_ids TEXT NOT NULL DEFAULT '[]',
    timestamp TEXT NOT NULL,
    message TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (context_id, id)
);
CREATE INDEX IF NOT EXISTS idx_version_refs_time ON version_refs(context_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS asset_versions (
    context_id TEXT NOT NULL REFERENCES contexts(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    version_ref_id TEXT NOT NULL,
    content_hash TEXT NOT NULL DEFAULT '',          -- '' for status=deleted
    status TEXT NOT NULL,                           -- added|modified|deleted|renamed
    renamed_from TEXT,
    UNIQUE(context_id, key, version_ref_id)
);
CREATE INDEX IF NOT EXISTS idx_asset_versions_ref ON asset_versions(context_id, version_ref_id);
CREATE INDEX IF NOT EXISTS idx_asset_versions_hash ON asset_versions(content_hash);

CREATE TABLE IF NOT EXISTS version_providers (
    context_id TEXT PRIMARY KEY REFERENCES contexts(id) ON DELETE CASCADE,
    provider_type TEXT NOT NULL,
    last_sync_ref TEXT,
    last_sync_at TEXT,
    config TEXT NOT NULL DEFAULT '{}'
);

-- =======================================
-- EVENTS: append-only activity log
-- =======================================
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,                            -- ULID, time-ordered
    timestamp TEXT NOT NULL,                        -- RFC 3339
    message TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_events_time ON events(timestamp DESC);

-- =======================================
-- EMBEDDINGS: little-endian F32 blobs
-- =======================================
CREATE TABLE IF NOT EXISTS asset_embeddings (
    asset_id TEXT PRIMARY KEY REFERENCES assets(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_embeddings (
    event_id TEXT PRIMARY KEY REFERENCES events(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- =======================================
-- INDEXER STATE: durable cursors
-- =======================================
CREATE TABLE IF NOT EXISTS indexer_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- =======================================
-- FULL-TEXT SEARCH (FTS5 external-content shadows)
-- =======================================
CREATE VIRTUAL TABLE IF NOT EXISTS assets_fts USING fts5(
    id,
    key,
    metadata,
    content='assets',
    tokenize='porter unicode61 remove_diacritics 1'
);

CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
    id,
    message,
    metadata,
    content='events',
    tokenize='porter unicode61 remove_diacritics 1'
);

CREATE VIRTUAL TABLE IF NOT EXISTS content_store_fts USING fts5(
    content_hash,
    content,
    content='content_store',
    tokenize='porter unicode61 remove_diacritics 1'
);

-- Shadow maintenance: triggers keep FTS rowids identical to base rowids.
CREATE TRIGGER IF NOT EXISTS assets_fts_ai AFTER INSERT ON assets BEGIN
    INSERT INTO assets_fts(rowid, id, key, metadata)
    VALUES (new.rowid, new.id, new.key, new.metadata);
END;
CREATE TRIGGER IF NOT EXISTS assets_fts_ad AFTER DELETE ON assets BEGIN
    INSERT INTO assets_fts(assets_fts, rowid, id, key, metadata)
    VALUES ('delete', old.rowid, old.id, old.key, old.metadata);
END;
CREATE TRIGGER IF NOT EXISTS assets_fts_au AFTER UPDATE ON assets BEGIN
    INSERT INTO assets_fts(assets_fts, rowid, id, key, metadata)
    VALUES ('delete', old.rowid, old.id, old.key, old.metadata);
    INSERT INTO assets_fts(rowid, id, key, metadata)
    VALUES (new.rowid, new.id, new.key, new.metadata);
END;

CREATE TRIGGER IF NOT EXISTS events_fts_ai AFTER INSERT ON events BEGIN
    INSERT INTO events_fts(rowid, id, message, metadata)
    VALUES (new.rowid, new.id, new.message, new.metadata);
END;
CREATE TRIGGER IF NOT EXISTS events_fts_ad AFTER DELETE ON events BEGIN
    INSERT INTO events_fts(events_fts, rowid, id, message, metadata)
    VALUES ('delete', old.rowid, old.id, old.message, old.metadata);
END;
CREATE TRIGGER IF NOT EXISTS events_fts_au AFTER UPDATE ON events BEGIN
    INSERT INTO events_fts(events_fts, rowid, id, message, metadata)
    VALUES ('delete', old.rowid, old.id, old.message, old.metadata);
    INSERT INTO events_fts(rowid, id, message, metadata)
    VALUES (new.rowid, new.id, new.message, new.metadata);
END;

CREATE TRIGGER IF NOT EXISTS content_store_fts_ai AFTER INSERT ON content_store BEGIN
    INSERT INTO content_store_fts(rowid, content_hash, content)
    VALUES (new.rowid, new.content_hash, new.content);
END;
CREATE TRIGGER IF NOT EXISTS content_store_fts_ad AFTER DELETE ON content_store BEGIN
    INSERT INTO content_store_fts(content_store_fts, rowid, content_hash, content)
    VALUES ('delete', old.rowid, old.content_hash, old.content);
END;
CREATE TRIGGER IF NOT EXISTS content_store_fts_au AFTER UPDATE OF content_hash, content ON content_store BEGIN
    INSERT INTO content_store_fts(content_store_fts, rowid, content_hash, content)
    VALUES ('delete', old.rowid, old.content_hash, old.content);
    INSERT INTO content_store_fts(rowid, content_hash, content)
    VALUES (new.rowid, new.content_hash, new.content);
END;
"#;
