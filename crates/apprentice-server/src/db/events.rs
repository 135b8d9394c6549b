// crates/apprentice-server/src/db/events.rs
// Append-only event rows

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

/// One activity-log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub id: String,
    pub timestamp: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub fn parse_event_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    let metadata_json: String = row.get(3)?;
    Ok(EventRow {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        message: row.get(2)?,
        metadata: serde_json::from_str(&metadata_json)
            .unwrap_or(serde_json::Value::Object(Default::default())),
    })
}

/// Insert an event, ignoring replays of an existing id.
/// Returns true when a row was actually written.
pub fn insert_event_sync(conn: &Connection, event: &EventRow) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO events (id, timestamp, message, metadata)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.id,
            event.timestamp,
            event.message,
            serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".into()),
        ],
    )?;
    Ok(inserted > 0)
}

pub fn get_event_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<EventRow>> {
    conn.query_row(
        "SELECT id, timestamp, message, metadata FROM events WHERE id = ?1",
        [id],
        parse_event_row,
    )
    .optional()
}
