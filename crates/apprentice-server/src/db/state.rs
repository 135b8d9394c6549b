// crates/apprentice-server/src/db/state.rs
// Durable indexer cursors, one JSON value per key

use crate::utils::now_rfc3339;
use rusqlite::{Connection, OptionalExtension, params};

pub fn get_state_sync(conn: &Connection, key: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM indexer_state WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn set_state_sync(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO indexer_state (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value.to_string(), now_rfc3339()],
    )?;
    Ok(())
}
