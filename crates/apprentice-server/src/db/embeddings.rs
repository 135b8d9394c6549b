// crates/apprentice-server/src/db/embeddings.rs
// Embedding rows: un-embedded selection and F32-blob upserts
//
// Vector layout is little-endian F32; every read and write goes through
// embedding_to_bytes / bytes_to_embedding.

use rusqlite::{Connection, params};

/// Convert an embedding vector to bytes for storage and vec queries.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_bytes`].
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// An asset still lacking an embedding row, with its text sources.
#[derive(Debug, Clone)]
pub struct UnembeddedAsset {
    pub asset_id: String,
    /// First 4000 chars of the stored content blob, when one exists.
    pub content_prefix: Option<String>,
    pub metadata: serde_json::Value,
}

/// An event still lacking an embedding row.
#[derive(Debug, Clone)]
pub struct UnembeddedEvent {
    pub event_id: String,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// Select up to `limit` assets without embeddings, oldest-indexed first.
pub fn select_unembedded_assets_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<UnembeddedAsset>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, substr(cs.content, 1, 4000), a.metadata
         FROM assets a
         LEFT JOIN content_store cs ON cs.content_hash = a.content_hash AND a.content_hash != ''
         WHERE NOT EXISTS (SELECT 1 FROM asset_embeddings e WHERE e.asset_id = a.id)
         ORDER BY a.indexed_at ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        let metadata_json: String = row.get(2)?;
        Ok(UnembeddedAsset {
            asset_id: row.get(0)?,
            content_prefix: row.get(1)?,
            metadata: serde_json::from_str(&metadata_json)
                .unwrap_or(serde_json::Value::Object(Default::default())),
        })
    })?;
    rows.collect()
}

/// Select up to `limit` events without embeddings, oldest first.
pub fn select_unembedded_events_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<UnembeddedEvent>> {
    let mut stmt = conn.prepare(
        "SELECT ev.id, ev.message, ev.metadata
         FROM events ev
         WHERE NOT EXISTS (SELECT 1 FROM event_embeddings e WHERE e.event_id = ev.id)
         ORDER BY ev.timestamp ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        let metadata_json: String = row.get(2)?;
        Ok(UnembeddedEvent {
            event_id: row.get(0)?,
            message: row.get(1)?,
            metadata: serde_json::from_str(&metadata_json)
                .unwrap_or(serde_json::Value::Object(Default::default())),
        })
    })?;
    rows.collect()
}

/// Upsert a batch of asset embeddings in one transaction.
pub fn upsert_asset_embeddings_sync(
    conn: &Connection,
    rows: &[(String, Vec<f32>)],
    model: &str,
    created_at: &str,
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO asset_embeddings (asset_id, embedding, model, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (id, embedding) in rows {
            stmt.execute(params![id, embedding_to_bytes(embedding), model, created_at])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Upsert a batch of event embeddings in one transaction.
pub fn upsert_event_embeddings_sync(
    conn: &Connection,
    rows: &[(String, Vec<f32>)],
    model: &str,
    created_at: &str,
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO event_embeddings (event_id, embedding, model, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (id, embedding) in rows {
            stmt.execute(params![id, embedding_to_bytes(embedding), model, created_at])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Which embedding corpus a query touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingCorpus {
    Assets,
    Events,
}

/// True when at least one embedding row exists for the corpus.
pub fn embeddings_available_sync(
    conn: &Connection,
    corpus: EmbeddingCorpus,
) -> rusqlite::Result<bool> {
    let sql = match corpus {
        EmbeddingCorpus::Assets => "SELECT EXISTS(SELECT 1 FROM asset_embeddings)",
        EmbeddingCorpus::Events => "SELECT EXISTS(SELECT 1 FROM event_embeddings)",
    };
    conn.query_row(sql, [], |row| row.get::<_, i64>(0)).map(|v| v != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::ensure_sqlite_vec_registered;

    fn conn() -> Connection {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().expect("open");
        super::super::schema::run_all_migrations(&conn).expect("schema");
        conn.execute(
            "INSERT INTO contexts (id, name, path, registered_at) VALUES ('ctx', 'ctx', '/p', 't')",
            [],
        )
        .expect("context");
        conn
    }

    #[test]
    fn test_bytes_roundtrip() {
        let v = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE];
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_embedding(&bytes), v);
    }

    #[test]
    fn test_unembedded_selection_and_upsert() {
        let conn = conn();
        conn.execute(
            "INSERT INTO assets (id, context_id, key, content_hash, indexed_at, metadata)
             VALUES ('a1', 'ctx', 'k1', 'h1', 't1', '{}')",
            [],
        )
        .expect("asset");
        conn.execute(
            "INSERT INTO content_store (content_hash, content, size_bytes, last_accessed_at, created_at)
             VALUES ('h1', 'echo hello', 10, 't', 't')",
            [],
        )
        .expect("blob");

        let pending = select_unembedded_assets_sync(&conn, 10).expect("select");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content_prefix.as_deref(), Some("echo hello"));

        upsert_asset_embeddings_sync(
            &conn,
            &[("a1".to_string(), vec![0.1, 0.2])],
            "test-model",
            "t",
        )
        .expect("upsert");

        assert!(select_unembedded_assets_sync(&conn, 10).expect("select").is_empty());
        assert!(embeddings_available_sync(&conn, EmbeddingCorpus::Assets).expect("avail"));
        assert!(!embeddings_available_sync(&conn, EmbeddingCorpus::Events).expect("avail"));
    }

    #[test]
    fn test_event_selection_oldest_first() {
        let conn = conn();
        for (id, ts) in [("e2", "2024-01-02T00:00:00Z"), ("e1", "2024-01-01T00:00:00Z")] {
            conn.execute(
                "INSERT INTO events (id, timestamp, message, metadata) VALUES (?, ?, 'm', '{}')",
                params![id, ts],
            )
            .expect("event");
        }
        let pending = select_unembedded_events_sync(&conn, 10).expect("select");
        assert_eq!(pending[0].event_id, "e1");
        assert_eq!(pending[1].event_id, "e2");

        // limit applies
        assert_eq!(select_unembedded_events_sync(&conn, 1).expect("select").len(), 1);
    }
}
