// crates/apprentice-server/src/db/search.rs
// FTS (BM25) and cosine-distance retrieval paths
//
// FTS scores are the negation of bm25() so that larger is better. The
// MATCH expression is built by search::query; these functions only run it.

use super::assets::AssetRow;
use super::events::{EventRow, parse_event_row};
use rusqlite::{Connection, params};

/// An event retrieved by one channel, with its channel score.
#[derive(Debug, Clone)]
pub struct EventHit {
    pub event: EventRow,
    pub score: f64,
}

/// An asset retrieved by one channel, with its channel score.
#[derive(Debug, Clone)]
pub struct AssetHit {
    pub asset: AssetRow,
    pub score: f64,
}

/// A versioned-content hit (search over historical file content).
#[derive(Debug, Clone)]
pub struct VersionHit {
    pub context_id: String,
    pub key: String,
    /// None for current head content in history searches.
    pub version_ref_id: Option<String>,
    pub content_hash: String,
    pub score: f64,
}

fn parse_asset_hit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetHit> {
    let metadata_json: String = row.get(6)?;
    Ok(AssetHit {
        asset: AssetRow {
            id: row.get(0)?,
            context_id: row.get(1)?,
            key: row.get(2)?,
            extension: row.get(3)?,
            content_hash: row.get(4)?,
            indexed_at: row.get(5)?,
            metadata: serde_json::from_str(&metadata_json)
                .unwrap_or(serde_json::Value::Object(Default::default())),
            head_version_ref: row.get(7)?,
        },
        score: row.get(8)?,
    })
}

/// BM25 search over events. `None` match expression falls back to
/// timestamp-descending selection with zero scores.
pub fn fts_search_events_sync(
    conn: &Connection,
    match_expr: Option<&str>,
    fetch_limit: usize,
) -> rusqlite::Result<Vec<EventHit>> {
    match match_expr {
        Some(expr) => {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.timestamp, e.message, e.metadata, -bm25(events_fts) AS score
                 FROM events_fts f
                 JOIN events e ON e.rowid = f.rowid
                 WHERE events_fts MATCH ?1
                 ORDER BY bm25(events_fts)
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![expr, fetch_limit as i64], |row| {
                Ok(EventHit {
                    event: parse_event_row(row)?,
                    score: row.get(4)?,
                })
            })?;
            rows.collect()
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, message, metadata FROM events
                 ORDER BY timestamp DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![fetch_limit as i64], |row| {
                Ok(EventHit {
                    event: parse_event_row(row)?,
                    score: 0.0,
                })
            })?;
            rows.collect()
        }
    }
}

/// BM25 search over assets (id, key, metadata).
pub fn fts_search_assets_sync(
    conn: &Connection,
    match_expr: Option<&str>,
    fetch_limit: usize,
) -> rusqlite::Result<Vec<AssetHit>> {
    match match_expr {
        Some(expr) => {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.context_id, a.key, a.extension, a.content_hash, a.indexed_at,
                        a.metadata, a.head_version_ref, -bm25(assets_fts) AS score
                 FROM assets_fts f
                 JOIN assets a ON a.rowid = f.rowid
                 WHERE assets_fts MATCH ?1
                 ORDER BY bm25(assets_fts)
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![expr, fetch_limit as i64], parse_asset_hit)?;
            rows.collect()
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, context_id, key, extension, content_hash, indexed_at,
                        metadata, head_version_ref, 0.0 AS score
                 FROM assets
                 ORDER BY indexed_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![fetch_limit as i64], parse_asset_hit)?;
            rows.collect()
        }
    }
}

/// BM25 search over content at one version ref.
///
/// `ref_id` under 40 chars matches as a prefix (LIKE), full length exactly.
pub fn fts_search_version_content_sync(
    conn: &Connection,
    match_expr: &str,
    context_id: &str,
    ref_id: &str,
    fetch_limit: usize,
) -> rusqlite::Result<Vec<VersionHit>> {
    let (ref_clause, ref_param) = if ref_id.len() < 40 {
        ("av.version_ref_id LIKE ?3", format!("{}%", ref_id.replace(['%', '_'], "")))
    } else {
        ("av.version_ref_id = ?3", ref_id.to_string())
    };
    let sql = format!(
        "SELECT av.context_id, av.key, av.version_ref_id, av.content_hash,
                -bm25(content_store_fts) AS score
         FROM content_store_fts f
         JOIN content_store cs ON cs.rowid = f.rowid
         JOIN asset_versions av ON av.content_hash = cs.content_hash
         WHERE content_store_fts MATCH ?1
           AND av.context_id = ?2
           AND {ref_clause}
         ORDER BY bm25(content_store_fts)
         LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![match_expr, context_id, ref_param, fetch_limit as i64],
        |row| {
            Ok(VersionHit {
                context_id: row.get(0)?,
                key: row.get(1)?,
                version_ref_id: Some(row.get(2)?),
                content_hash: row.get(3)?,
                score: row.get(4)?,
            })
        },
    )?;
    rows.collect()
}

/// BM25 search over all historical content of a context, unioned with the
/// current head content of its assets.
pub fn fts_search_version_history_sync(
    conn: &Connection,
    match_expr: &str,
    context_id: &str,
    fetch_limit: usize,
) -> rusqlite::Result<Vec<VersionHit>> {
    let mut hits = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT av.context_id, av.key, av.version_ref_id, av.content_hash,
                -bm25(content_store_fts) AS score
         FROM content_store_fts f
         JOIN content_store cs ON cs.rowid = f.rowid
         JOIN asset_versions av ON av.content_hash = cs.content_hash
         WHERE content_store_fts MATCH ?1 AND av.context_id = ?2
         ORDER BY bm25(content_store_fts)
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![match_expr, context_id, fetch_limit as i64], |row| {
        Ok(VersionHit {
            context_id: row.get(0)?,
            key: row.get(1)?,
            version_ref_id: Some(row.get(2)?),
            content_hash: row.get(3)?,
            score: row.get(4)?,
        })
    })?;
    for hit in rows {
        hits.push(hit?);
    }

    let mut stmt = conn.prepare(
        "SELECT a.context_id, a.key, a.content_hash, -bm25(content_store_fts) AS score
         FROM content_store_fts f
         JOIN content_store cs ON cs.rowid = f.rowid
         JOIN assets a ON a.content_hash = cs.content_hash
         WHERE content_store_fts MATCH ?1 AND a.context_id = ?2
         ORDER BY bm25(content_store_fts)
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![match_expr, context_id, fetch_limit as i64], |row| {
        Ok(VersionHit {
            context_id: row.get(0)?,
            key: row.get(1)?,
            version_ref_id: None,
            content_hash: row.get(2)?,
            score: row.get(3)?,
        })
    })?;
    for hit in rows {
        hits.push(hit?);
    }

    // keep the best score per (key, hash) so head and history don't duplicate
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut seen = std::collections::HashSet::new();
    hits.retain(|h| seen.insert((h.key.clone(), h.content_hash.clone())));
    hits.truncate(fetch_limit);
    Ok(hits)
}

/// Cosine-distance search over event embeddings.
/// `query_json` is the query vector serialised as a JSON array.
pub fn vector_search_events_sync(
    conn: &Connection,
    query_json: &str,
    fetch_limit: usize,
) -> rusqlite::Result<Vec<(EventRow, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.timestamp, e.message, e.metadata,
                vec_distance_cosine(emb.embedding, ?1) AS distance
         FROM event_embeddings emb
         JOIN events e ON e.id = emb.event_id
         ORDER BY distance ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![query_json, fetch_limit as i64], |row| {
        Ok((parse_event_row(row)?, row.get::<_, f64>(4)?))
    })?;
    rows.collect()
}

/// Cosine-distance search over asset embeddings.
pub fn vector_search_assets_sync(
    conn: &Connection,
    query_json: &str,
    fetch_limit: usize,
) -> rusqlite::Result<Vec<(AssetRow, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.context_id, a.key, a.extension, a.content_hash, a.indexed_at,
                a.metadata, a.head_version_ref,
                vec_distance_cosine(emb.embedding, ?1) AS distance
         FROM asset_embeddings emb
         JOIN assets a ON a.id = emb.asset_id
         ORDER BY distance ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![query_json, fetch_limit as i64], |row| {
        let hit = parse_asset_hit(row)?;
        Ok((hit.asset, hit.score))
    })?;
    rows.collect()
}
