// crates/apprentice-server/src/db/content_store.rs
// Content-addressed blob store with reference-counted eviction

use crate::utils::now_rfc3339;
use rusqlite::{Connection, OptionalExtension, params};

/// Read a blob, advancing `last_accessed_at` in the same logical step.
pub fn content_get_sync(conn: &Connection, hash: &str) -> rusqlite::Result<Option<String>> {
    let content: Option<String> = conn
        .query_row(
            "SELECT content FROM content_store WHERE content_hash = ?1",
            [hash],
            |row| row.get(0),
        )
        .optional()?;

    if content.is_some() {
        conn.execute(
            "UPDATE content_store SET last_accessed_at = ?2 WHERE content_hash = ?1",
            params![hash, now_rfc3339()],
        )?;
    }
    Ok(content)
}

/// Insert a blob (if absent) and a head ref for (hash, context).
/// Both inserts ignore collisions, including on the partial head index.
pub fn content_put_sync(
    conn: &Connection,
    hash: &str,
    content: &str,
    context_id: &str,
) -> rusqlite::Result<()> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO content_store (content_hash, content, size_bytes, last_accessed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![hash, content, content.len() as i64, now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO content_refs (content_hash, context_id, is_head)
         VALUES (?1, ?2, 1)",
        params![hash, context_id],
    )?;
    Ok(())
}

/// Insert a blob without any ref (version sync attaches its own refs).
pub fn insert_content_blob_sync(
    conn: &Connection,
    hash: &str,
    content: &str,
) -> rusqlite::Result<()> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO content_store (content_hash, content, size_bytes, last_accessed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![hash, content, content.len() as i64, now],
    )?;
    Ok(())
}

/// Record a versioned (non-head) reference to a blob.
pub fn insert_version_content_ref_sync(
    conn: &Connection,
    hash: &str,
    context_id: &str,
    version_ref_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO content_refs (content_hash, context_id, is_head, version_ref_id)
         VALUES (?1, ?2, 0, ?3)",
        params![hash, context_id, version_ref_id],
    )?;
    Ok(())
}

/// Drop the head ref(s) for a hash, deleting the blob when the head was the
/// last meaningful reference.
///
/// The refcount is taken BEFORE any deletion and the blob is removed before
/// the ref row; reordering these retains orphaned blobs forever.
pub fn release_head_sync(conn: &Connection, hash: &str) -> rusqlite::Result<()> {
    let refcount: i64 = conn.query_row(
        "SELECT COUNT(*) FROM content_refs WHERE content_hash = ?1",
        [hash],
        |row| row.get(0),
    )?;
    if refcount <= 1 {
        conn.execute("DELETE FROM content_store WHERE content_hash = ?1", [hash])?;
    }
    conn.execute(
        "DELETE FROM content_refs WHERE content_hash = ?1 AND is_head = 1",
        [hash],
    )?;
    Ok(())
}

pub fn content_exists_sync(conn: &Connection, hash: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM content_store WHERE content_hash = ?1",
        [hash],
        |_| Ok(true),
    )
    .optional()
    .map(|v| v.unwrap_or(false))
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionStats {
    pub rows_evicted: usize,
    pub bytes_freed: u64,
}

/// Evict up to `batch_size` blobs not read for `threshold_days` that no
/// head ref keeps alive. Blobs still referenced by version refs lose those
/// rows too; history lookups fall back to the provider.
pub fn evict_unreferenced_sync(
    conn: &Connection,
    threshold_days: i64,
    batch_size: usize,
) -> rusqlite::Result<EvictionStats> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(threshold_days))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    let mut stmt = conn.prepare(
        "SELECT cs.content_hash, cs.size_bytes
         FROM content_store cs
         WHERE cs.last_accessed_at < ?1
           AND NOT EXISTS (
               SELECT 1 FROM content_refs cr
               WHERE cr.content_hash = cs.content_hash AND cr.is_head = 1
           )
         LIMIT ?2",
    )?;
    let candidates: Vec<(String, i64)> = stmt
        .query_map(params![cutoff, batch_size as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut stats = EvictionStats::default();
    for (hash, size) in candidates {
        conn.execute("DELETE FROM content_store WHERE content_hash = ?1", [&hash])?;
        conn.execute("DELETE FROM content_refs WHERE content_hash = ?1", [&hash])?;
        stats.rows_evicted += 1;
        stats.bytes_freed += size.max(0) as u64;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::ensure_sqlite_vec_registered;

    fn conn() -> Connection {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().expect("open");
        super::super::schema::run_all_migrations(&conn).expect("schema");
        conn
    }

    #[test]
    fn test_put_get_updates_access_time() {
        let conn = conn();
        content_put_sync(&conn, "h1", "hello", "ctx").expect("put");

        let before: String = conn
            .query_row(
                "SELECT last_accessed_at FROM content_store WHERE content_hash='h1'",
                [],
                |r| r.get(0),
            )
            .expect("read");
        std::thread::sleep(std::time::Duration::from_millis(5));

        let content = content_get_sync(&conn, "h1").expect("get");
        assert_eq!(content.as_deref(), Some("hello"));

        let after: String = conn
            .query_row(
                "SELECT last_accessed_at FROM content_store WHERE content_hash='h1'",
                [],
                |r| r.get(0),
            )
            .expect("read");
        assert!(after >= before);
    }

    #[test]
    fn test_put_is_idempotent_for_head_refs() {
        let conn = conn();
        content_put_sync(&conn, "h1", "hello", "ctx").expect("put");
        content_put_sync(&conn, "h1", "hello", "ctx").expect("re-put");

        let heads: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM content_refs WHERE content_hash='h1' AND is_head=1",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(heads, 1);
    }

    #[test]
    fn test_release_head_deletes_last_referenced_blob() {
        let conn = conn();
        content_put_sync(&conn, "h1", "hello", "ctx").expect("put");
        release_head_sync(&conn, "h1").expect("release");

        assert!(!content_exists_sync(&conn, "h1").expect("exists"));
        let refs: i64 = conn
            .query_row("SELECT COUNT(*) FROM content_refs WHERE content_hash='h1'", [], |r| {
                r.get(0)
            })
            .expect("count");
        assert_eq!(refs, 0);
    }

    #[test]
    fn test_release_head_keeps_blob_with_version_refs() {
        let conn = conn();
        content_put_sync(&conn, "h1", "hello", "ctx").expect("put");
        insert_version_content_ref_sync(&conn, "h1", "ctx", "ref1").expect("vref");

        // two refs total: refcount > 1, the blob must survive
        release_head_sync(&conn, "h1").expect("release");
        assert!(content_exists_sync(&conn, "h1").expect("exists"));

        let heads: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM content_refs WHERE content_hash='h1' AND is_head=1",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(heads, 0);
    }

    #[test]
    fn test_eviction_respects_head_refs() {
        let conn = conn();
        content_put_sync(&conn, "kept", "kept content", "ctx").expect("put");
        // unreferenced, stale blob
        conn.execute(
            "INSERT INTO content_store (content_hash, content, size_bytes, last_accessed_at, created_at)
             VALUES ('stale', 'old', 3, '2000-01-01T00:00:00.000Z', '2000-01-01T00:00:00.000Z')",
            [],
        )
        .expect("stale blob");

        let stats = evict_unreferenced_sync(&conn, 0, 100).expect("evict");
        assert_eq!(stats.rows_evicted, 1);
        assert_eq!(stats.bytes_freed, 3);
        assert!(content_exists_sync(&conn, "kept").expect("exists"));
        assert!(!content_exists_sync(&conn, "stale").expect("exists"));
    }

    #[test]
    fn test_eviction_after_release_frees_blob_bytes() {
        let conn = conn();
        content_put_sync(&conn, "h1", "hello", "ctx").expect("put");
        insert_version_content_ref_sync(&conn, "h1", "ctx", "ref1").expect("vref");
        release_head_sync(&conn, "h1").expect("release");
        // blob survives on the version ref, then ages out
        conn.execute(
            "UPDATE content_store SET last_accessed_at = '2000-01-01T00:00:00.000Z'",
            [],
        )
        .expect("age");

        let stats = evict_unreferenced_sync(&conn, 0, 100).expect("evict");
        assert_eq!(stats.rows_evicted, 1);
        assert_eq!(stats.bytes_freed, 5);
    }
}
