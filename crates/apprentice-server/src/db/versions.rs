// crates/apprentice-server/src/db/versions.rs
// Version history rows: refs, per-ref file states, provider cursors

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

/// A point in a context's version history (commit or tag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRefRow {
    pub id: String,
    pub ref_type: RefType,
    pub name: String,
    pub parent_ids: Vec<String>,
    pub timestamp: String,
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Commit,
    Tag,
    Branch,
}

impl RefType {
    pub fn as_str(self) -> &'static str {
        match self {
            RefType::Commit => "commit",
            RefType::Tag => "tag",
            RefType::Branch => "branch",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "tag" => RefType::Tag,
            "branch" => RefType::Branch,
            _ => RefType::Commit,
        }
    }
}

/// Change status of an asset at a ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl VersionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionStatus::Added => "added",
            VersionStatus::Modified => "modified",
            VersionStatus::Deleted => "deleted",
            VersionStatus::Renamed => "renamed",
        }
    }
}

/// Version-provider cursor per context.
#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub context_id: String,
    pub provider_type: String,
    pub last_sync_ref: Option<String>,
    pub last_sync_at: Option<String>,
    pub config: serde_json::Value,
}

/// Insert a version ref; refs are append-only and replays are ignored.
pub fn insert_version_ref_sync(
    conn: &Connection,
    context_id: &str,
    vref: &VersionRefRow,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO version_refs
             (id, context_id, ref_type, name, parent_ids, timestamp, message, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            vref.id,
            context_id,
            vref.ref_type.as_str(),
            vref.name,
            serde_json::to_string(&vref.parent_ids).unwrap_or_else(|_| "[]".into()),
            vref.timestamp,
            vref.message,
            serde_json::to_string(&vref.metadata).unwrap_or_else(|_| "{}".into()),
        ],
    )?;
    Ok(())
}

pub fn version_ref_exists_sync(
    conn: &Connection,
    context_id: &str,
    id: &str,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM version_refs WHERE context_id = ?1 AND id = ?2",
        params![context_id, id],
        |_| Ok(true),
    )
    .optional()
    .map(|v| v.unwrap_or(false))
}

fn parse_version_ref_row(row: &Row<'_>) -> rusqlite::Result<VersionRefRow> {
    let ref_type: String = row.get(1)?;
    let parents_json: String = row.get(3)?;
    let metadata_json: String = row.get(6)?;
    Ok(VersionRefRow {
        id: row.get(0)?,
        ref_type: RefType::from_str(&ref_type),
        name: row.get(2)?,
        parent_ids: serde_json::from_str(&parents_json).unwrap_or_default(),
        timestamp: row.get(4)?,
        message: row.get(5)?,
        metadata: serde_json::from_str(&metadata_json)
            .unwrap_or(serde_json::Value::Object(Default::default())),
    })
}

pub fn get_version_ref_sync(
    conn: &Connection,
    context_id: &str,
    id: &str,
) -> rusqlite::Result<Option<VersionRefRow>> {
    conn.query_row(
        "SELECT id, ref_type, name, parent_ids, timestamp, message, metadata
         FROM version_refs WHERE context_id = ?1 AND id = ?2",
        params![context_id, id],
        parse_version_ref_row,
    )
    .optional()
}

/// Resolve a possibly-short ref id within one context.
///
/// Full-length ids match exactly; shorter inputs resolve to the first ref
/// with that prefix in insertion order.
pub fn resolve_ref_prefix_sync(
    conn: &Connection,
    context_id: &str,
    prefix: &str,
) -> rusqlite::Result<Option<String>> {
    if prefix.len() >= 40 {
        return conn
            .query_row(
                "SELECT id FROM version_refs WHERE context_id = ?1 AND id = ?2",
                params![context_id, prefix],
                |row| row.get(0),
            )
            .optional();
    }
    conn.query_row(
        "SELECT id FROM version_refs WHERE context_id = ?1 AND id LIKE ?2 LIMIT 1",
        params![context_id, format!("{}%", prefix.replace(['%', '_'], ""))],
        |row| row.get(0),
    )
    .optional()
}

/// Record an asset's state at a ref; unique per (context, key, ref).
pub fn insert_asset_version_sync(
    conn: &Connection,
    context_id: &str,
    key: &str,
    version_ref_id: &str,
    content_hash: &str,
    status: VersionStatus,
    renamed_from: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO asset_versions
             (context_id, key, version_ref_id, content_hash, status, renamed_from)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![context_id, key, version_ref_id, content_hash, status.as_str(), renamed_from],
    )?;
    Ok(())
}

pub fn get_provider_row_sync(
    conn: &Connection,
    context_id: &str,
) -> rusqlite::Result<Option<ProviderRow>> {
    conn.query_row(
        "SELECT context_id, provider_type, last_sync_ref, last_sync_at, config
         FROM version_providers WHERE context_id = ?1",
        [context_id],
        |row| {
            let config_json: String = row.get(4)?;
            Ok(ProviderRow {
                context_id: row.get(0)?,
                provider_type: row.get(1)?,
                last_sync_ref: row.get(2)?,
                last_sync_at: row.get(3)?,
                config: serde_json::from_str(&config_json)
                    .unwrap_or(serde_json::Value::Object(Default::default())),
            })
        },
    )
    .optional()
}

pub fn set_provider_row_sync(conn: &Connection, row: &ProviderRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO version_providers (context_id, provider_type, last_sync_ref, last_sync_at, config)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(context_id) DO UPDATE SET
             provider_type = excluded.provider_type,
             last_sync_ref = excluded.last_sync_ref,
             last_sync_at = excluded.last_sync_at,
             config = excluded.config",
        params![
            row.context_id,
            row.provider_type,
            row.last_sync_ref,
            row.last_sync_at,
            row.config.to_string(),
        ],
    )?;
    Ok(())
}

/// Advance the sync cursor after a completed pass.
pub fn update_provider_sync(
    conn: &Connection,
    context_id: &str,
    last_sync_ref: &str,
    last_sync_at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE version_providers SET last_sync_ref = ?2, last_sync_at = ?3 WHERE context_id = ?1",
        params![context_id, last_sync_ref, last_sync_at],
    )?;
    Ok(())
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

    fn vref(id: &str, ts: &str) -> VersionRefRow {
        VersionRefRow {
            id: id.into(),
            ref_type: RefType::Commit,
            name: id[..7.min(id.len())].into(),
            parent_ids: vec![],
            timestamp: ts.into(),
            message: Some("msg".into()),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    #[test]
    fn test_version_ref_append_only() {
        let conn = conn();
        let r = vref("aaaabbbbccccddddeeeeffff0000111122223333", "2024-01-01T00:00:00Z");
        insert_version_ref_sync(&conn, "ctx", &r).expect("insert");
        insert_version_ref_sync(&conn, "ctx", &r).expect("replay");
        assert!(version_ref_exists_sync(&conn, "ctx", &r.id).expect("exists"));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM version_refs", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_resolve_short_prefix_first_match() {
        let conn = conn();
        insert_version_ref_sync(&conn, "ctx", &vref("abc1111111111111111111111111111111111111", "t1"))
            .expect("insert");
        insert_version_ref_sync(&conn, "ctx", &vref("abc2222222222222222222222222222222222222", "t2"))
            .expect("insert");

        // first match in insertion order
        let resolved = resolve_ref_prefix_sync(&conn, "ctx", "abc").expect("resolve");
        assert_eq!(
            resolved.as_deref(),
            Some("abc1111111111111111111111111111111111111")
        );

        // full-length ids match exactly
        let exact =
            resolve_ref_prefix_sync(&conn, "ctx", "abc2222222222222222222222222222222222222")
                .expect("resolve");
        assert_eq!(
            exact.as_deref(),
            Some("abc2222222222222222222222222222222222222")
        );

        assert!(resolve_ref_prefix_sync(&conn, "ctx", "zzz").expect("resolve").is_none());
    }

    #[test]
    fn test_asset_version_unique_per_ref() {
        let conn = conn();
        insert_asset_version_sync(&conn, "ctx", "a.sh", "r1", "h1", VersionStatus::Added, None)
            .expect("insert");
        insert_asset_version_sync(&conn, "ctx", "a.sh", "r1", "h2", VersionStatus::Modified, None)
            .expect("replay ignored");

        let (hash, status): (String, String) = conn
            .query_row(
                "SELECT content_hash, status FROM asset_versions WHERE context_id='ctx' AND key='a.sh'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("row");
        assert_eq!(hash, "h1");
        assert_eq!(status, "added");
    }

    #[test]
    fn test_provider_cursor_roundtrip() {
        let conn = conn();
        set_provider_row_sync(
            &conn,
            &ProviderRow {
                context_id: "ctx".into(),
                provider_type: "git".into(),
                last_sync_ref: None,
                last_sync_at: None,
                config: serde_json::json!({"branch": "main"}),
            },
        )
        .expect("set");

        update_provider_sync(&conn, "ctx", "abc", "2024-01-01T00:00:00Z").expect("update");
        let row = get_provider_row_sync(&conn, "ctx").expect("get").expect("some");
        assert_eq!(row.provider_type, "git");
        assert_eq!(row.last_sync_ref.as_deref(), Some("abc"));
        assert_eq!(row.config["branch"], "main");
    }
}
