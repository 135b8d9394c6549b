// crates/apprentice-server/src/db/contexts.rs
// Context rows: registered folders with mounts and glob patterns

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

/// A mounted external directory, exposed under a virtual key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub path: String,
    pub mount: String,
}

/// A registered context.
#[derive(Debug, Clone)]
pub struct ContextRow {
    pub id: String,
    pub name: String,
    pub path: String,
    pub mounts: Vec<Mount>,
    pub enabled: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub registered_at: String,
    pub last_indexed_at: Option<String>,
    pub version_provider_type: Option<String>,
}

const CONTEXT_COLUMNS: &str = "id, name, path, mounts, enabled, include_patterns, \
                               exclude_patterns, registered_at, last_indexed_at, \
                               version_provider_type";

pub fn parse_context_row(row: &Row<'_>) -> rusqlite::Result<ContextRow> {
    let mounts_json: String = row.get(3)?;
    let include_json: String = row.get(5)?;
    let exclude_json: String = row.get(6)?;
    Ok(ContextRow {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        mounts: serde_json::from_str(&mounts_json).unwrap_or_default(),
        enabled: row.get::<_, i64>(4)? != 0,
        include_patterns: serde_json::from_str(&include_json).unwrap_or_default(),
        exclude_patterns: serde_json::from_str(&exclude_json).unwrap_or_default(),
        registered_at: row.get(7)?,
        last_indexed_at: row.get(8)?,
        version_provider_type: row.get(9)?,
    })
}

pub fn insert_context_sync(conn: &Connection, ctx: &ContextRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO contexts (id, name, path, mounts, enabled, include_patterns,
                               exclude_patterns, registered_at, last_indexed_at,
                               version_provider_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            ctx.id,
            ctx.name,
            ctx.path,
            serde_json::to_string(&ctx.mounts).unwrap_or_else(|_| "[]".into()),
            ctx.enabled as i64,
            serde_json::to_string(&ctx.include_patterns).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(&ctx.exclude_patterns).unwrap_or_else(|_| "[]".into()),
            ctx.registered_at,
            ctx.last_indexed_at,
            ctx.version_provider_type,
        ],
    )?;
    Ok(())
}

/// Rewrite the mutable fields of a context (name, mounts, patterns,
/// enabled, version provider type).
pub fn update_context_sync(conn: &Connection, ctx: &ContextRow) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE contexts
         SET name = ?2, mounts = ?3, enabled = ?4, include_patterns = ?5,
             exclude_patterns = ?6, version_provider_type = ?7
         WHERE id = ?1",
        params![
            ctx.id,
            ctx.name,
            serde_json::to_string(&ctx.mounts).unwrap_or_else(|_| "[]".into()),
            ctx.enabled as i64,
            serde_json::to_string(&ctx.include_patterns).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(&ctx.exclude_patterns).unwrap_or_else(|_| "[]".into()),
            ctx.version_provider_type,
        ],
    )?;
    Ok(())
}

pub fn list_contexts_sync(conn: &Connection, enabled_only: bool) -> rusqlite::Result<Vec<ContextRow>> {
    let sql = if enabled_only {
        format!("SELECT {CONTEXT_COLUMNS} FROM contexts WHERE enabled = 1 ORDER BY id")
    } else {
        format!("SELECT {CONTEXT_COLUMNS} FROM contexts ORDER BY id")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], parse_context_row)?;
    rows.collect()
}

pub fn get_context_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<ContextRow>> {
    conn.query_row(
        &format!("SELECT {CONTEXT_COLUMNS} FROM contexts WHERE id = ?1"),
        [id],
        parse_context_row,
    )
    .optional()
}

pub fn get_context_by_path_sync(
    conn: &Connection,
    path: &str,
) -> rusqlite::Result<Option<ContextRow>> {
    conn.query_row(
        &format!("SELECT {CONTEXT_COLUMNS} FROM contexts WHERE path = ?1"),
        [path],
        parse_context_row,
    )
    .optional()
}

pub fn set_context_enabled_sync(conn: &Connection, id: &str, enabled: bool) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE contexts SET enabled = ?2 WHERE id = ?1",
        params![id, enabled as i64],
    )?;
    Ok(changed > 0)
}

pub fn set_last_indexed_at_sync(conn: &Connection, id: &str, at: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE contexts SET last_indexed_at = ?2 WHERE id = ?1",
        params![id, at],
    )?;
    Ok(())
}

/// Remove a context; assets, versions, embeddings and provider rows cascade.
pub fn delete_context_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute("DELETE FROM contexts WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::ensure_sqlite_vec_registered;
    use crate::utils::now_rfc3339;

    fn conn() -> Connection {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().expect("open");
        super::super::schema::run_all_migrations(&conn).expect("schema");
        conn
    }

    fn sample(id: &str, path: &str) -> ContextRow {
        ContextRow {
            id: id.into(),
            name: id.into(),
            path: path.into(),
            mounts: vec![],
            enabled: true,
            include_patterns: vec!["**/*".into()],
            exclude_patterns: vec![],
            registered_at: now_rfc3339(),
            last_indexed_at: None,
            version_provider_type: None,
        }
    }

    #[test]
    fn test_insert_and_roundtrip() {
        let conn = conn();
        let mut ctx = sample("notes", "/home/u/notes");
        ctx.mounts.push(Mount {
            path: "/mnt/shared".into(),
            mount: "shared".into(),
        });
        insert_context_sync(&conn, &ctx).expect("insert");

        let loaded = get_context_sync(&conn, "notes").expect("get").expect("some");
        assert_eq!(loaded.path, "/home/u/notes");
        assert_eq!(loaded.mounts, ctx.mounts);
        assert_eq!(loaded.include_patterns, vec!["**/*".to_string()]);
        assert!(loaded.enabled);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let conn = conn();
        insert_context_sync(&conn, &sample("a", "/same")).expect("first");
        assert!(insert_context_sync(&conn, &sample("b", "/same")).is_err());
    }

    #[test]
    fn test_enabled_filter() {
        let conn = conn();
        insert_context_sync(&conn, &sample("on", "/on")).expect("insert");
        let mut off = sample("off", "/off");
        off.enabled = false;
        insert_context_sync(&conn, &off).expect("insert");

        assert_eq!(list_contexts_sync(&conn, true).expect("list").len(), 1);
        assert_eq!(list_contexts_sync(&conn, false).expect("list").len(), 2);

        set_context_enabled_sync(&conn, "off", true).expect("enable");
        assert_eq!(list_contexts_sync(&conn, true).expect("list").len(), 2);
    }

    #[test]
    fn test_lookup_by_path_and_delete() {
        let conn = conn();
        insert_context_sync(&conn, &sample("x", "/x")).expect("insert");
        assert!(get_context_by_path_sync(&conn, "/x").expect("get").is_some());
        assert!(delete_context_sync(&conn, "x").expect("delete"));
        assert!(get_context_sync(&conn, "x").expect("get").is_none());
        assert!(!delete_context_sync(&conn, "x").expect("second delete"));
    }
}
