// crates/apprentice-server/src/db/assets.rs
// Asset rows: the identity layer over discovered files

use rusqlite::{Connection, OptionalExtension, Row, params};

/// A stored asset.
#[derive(Debug, Clone)]
pub struct AssetRow {
    pub id: String,
    pub context_id: String,
    pub key: String,
    pub extension: String,
    pub content_hash: String,
    pub indexed_at: String,
    pub metadata: serde_json::Value,
    pub head_version_ref: Option<String>,
}

/// Fields written by the upserter.
#[derive(Debug, Clone)]
pub struct AssetUpsert {
    pub id: String,
    pub context_id: String,
    pub key: String,
    pub extension: String,
    pub content_hash: String,
    pub indexed_at: String,
    pub metadata: serde_json::Value,
}

/// What the upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

fn parse_asset_row(row: &Row<'_>) -> rusqlite::Result<AssetRow> {
    let metadata_json: String = row.get(6)?;
    Ok(AssetRow {
        id: row.get(0)?,
        context_id: row.get(1)?,
        key: row.get(2)?,
        extension: row.get(3)?,
        content_hash: row.get(4)?,
        indexed_at: row.get(5)?,
        metadata: serde_json::from_str(&metadata_json)
            .unwrap_or(serde_json::Value::Object(Default::default())),
        head_version_ref: row.get(7)?,
    })
}

const ASSET_COLUMNS: &str =
    "id, context_id, key, extension, content_hash, indexed_at, metadata, head_version_ref";

/// Current content hash for an asset id, None when the asset is unknown.
pub fn get_asset_content_hash_sync(
    conn: &Connection,
    id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT content_hash FROM assets WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()
}

/// Insert or update an asset row, returning whether a row already existed.
pub fn upsert_asset_sync(
    conn: &Connection,
    asset: &AssetUpsert,
) -> rusqlite::Result<UpsertOutcome> {
    let existed: bool = conn
        .query_row("SELECT 1 FROM assets WHERE id = ?1", [&asset.id], |_| Ok(true))
        .optional()?
        .unwrap_or(false);

    conn.execute(
        "INSERT INTO assets (id, context_id, key, extension, content_hash, indexed_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             extension = excluded.extension,
             content_hash = excluded.content_hash,
             indexed_at = excluded.indexed_at,
             metadata = excluded.metadata",
        params![
            asset.id,
            asset.context_id,
            asset.key,
            asset.extension,
            asset.content_hash,
            asset.indexed_at,
            serde_json::to_string(&asset.metadata).unwrap_or_else(|_| "{}".into()),
        ],
    )?;

    Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Added })
}

pub fn get_asset_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<AssetRow>> {
    conn.query_row(
        &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"),
        [id],
        parse_asset_row,
    )
    .optional()
}

/// Fetch a set of assets by id, skipping unknown ids.
pub fn get_assets_by_ids_sync(conn: &Connection, ids: &[String]) -> rusqlite::Result<Vec<AssetRow>> {
    let mut out = Vec::with_capacity(ids.len());
    let mut stmt =
        conn.prepare(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"))?;
    for id in ids {
        if let Some(asset) = stmt.query_row([id], parse_asset_row).optional()? {
            out.push(asset);
        }
    }
    Ok(out)
}
