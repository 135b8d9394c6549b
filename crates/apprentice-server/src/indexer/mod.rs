// crates/apprentice-server/src/indexer/mod.rs
// Incremental asset indexing: discovery -> hash -> upsert -> content store

pub mod chat_import;
pub mod discovery;
pub mod log_ingest;

use crate::config::ApprenticeConfig;
use crate::db::{
    self, AssetUpsert, ContextRow, DatabasePool, UpsertOutcome,
};
use crate::metadata::extractors::ExtractorRegistry;
use crate::utils::{asset_id, now_rfc3339, path_to_string};
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

/// Files at or below this size are read and run through metadata
/// extraction; anything larger is indexed by hash alone.
const MAX_EXTRACT_BYTES: u64 = 500_000;

/// Counters for one context's indexing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub files_added: usize,
    pub files_updated: usize,
    pub files_skipped: usize,
    pub errors: usize,
}

impl IndexOutcome {
    pub fn changed(&self) -> usize {
        self.files_added + self.files_updated
    }
}

/// Index one context: reconcile its discovered files with the assets table.
/// Per-file failures are counted and never abort the pass.
pub async fn index_context(
    pool: &Arc<DatabasePool>,
    extractors: &ExtractorRegistry,
    config: &ApprenticeConfig,
    ctx: &ContextRow,
) -> Result<IndexOutcome> {
    let mut outcome = IndexOutcome::default();
    let files = discovery::discover_context(ctx)?;
    let max_file_size = config.indexer.max_file_size;
    let max_content_store = config.indexer.max_content_store;

    for file in files {
        match index_one_file(pool, extractors, ctx, &file, max_file_size, max_content_store).await {
            Ok(FileOutcome::Added) => outcome.files_added += 1,
            Ok(FileOutcome::Updated) => outcome.files_updated += 1,
            Ok(FileOutcome::Skipped) => outcome.files_skipped += 1,
            Err(e) => {
                outcome.errors += 1;
                tracing::warn!(
                    context = %ctx.id,
                    key = %file.key,
                    "Failed to index file: {:#}",
                    e
                );
            }
        }
    }

    let now = now_rfc3339();
    let ctx_id = ctx.id.clone();
    pool.interact(move |conn| {
        db::set_last_indexed_at_sync(conn, &ctx_id, &now)?;
        Ok(())
    })
    .await?;

    Ok(outcome)
}

enum FileOutcome {
    Added,
    Updated,
    Skipped,
}

async fn index_one_file(
    pool: &Arc<DatabasePool>,
    extractors: &ExtractorRegistry,
    ctx: &ContextRow,
    file: &discovery::DiscoveredFile,
    max_file_size: u64,
    max_content_store: u64,
) -> Result<FileOutcome> {
    let id = asset_id(&ctx.id, &file.key);
    let hash = discovery::hash_file(&file.absolute_path)?;

    let existing = {
        let id = id.clone();
        pool.interact(move |conn| Ok(db::get_asset_content_hash_sync(conn, &id)?))
            .await?
    };
    if existing.as_deref() == Some(hash.as_str()) {
        return Ok(FileOutcome::Skipped);
    }

    let meta = std::fs::metadata(&file.absolute_path)?;
    let size = meta.len();
    let extension = file
        .absolute_path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    // read + extract only for small files; oversized files keep hash-only rows
    let (content, mut metadata) = if size <= MAX_EXTRACT_BYTES && size <= max_file_size {
        let bytes = std::fs::read(&file.absolute_path)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| anyhow::anyhow!("file is not valid UTF-8: {}", file.key))?;
        let extracted = extractors.extract(&file.absolute_path, &extension, &text);
        (Some(text), extracted)
    } else {
        (None, serde_json::Value::Object(Default::default()))
    };

    if let Some(map) = metadata.as_object_mut() {
        let modified = meta
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());
        map.insert(
            "filesystem".to_string(),
            json!({
                "size": size,
                "modified": modified,
                "source_path": file.source_path,
                "path": path_to_string(&file.absolute_path),
            }),
        );
    }

    let upsert = AssetUpsert {
        id: id.clone(),
        context_id: ctx.id.clone(),
        key: file.key.clone(),
        extension,
        content_hash: hash.clone(),
        indexed_at: now_rfc3339(),
        metadata,
    };

    let context_id = ctx.id.clone();
    let store_content = content.filter(|c| c.len() as u64 <= max_content_store);
    let old_hash = existing.clone();
    let outcome = pool
        .interact(move |conn| {
            let outcome = db::upsert_asset_sync(conn, &upsert)?;

            if let Some(ref text) = store_content {
                db::content_put_sync(conn, &upsert.content_hash, text, &context_id)?;
            }

            // the previous content loses its head ref once nothing points at it
            if let Some(old) = old_hash.filter(|h| !h.is_empty() && *h != upsert.content_hash) {
                let still_used: bool = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM assets WHERE content_hash = ?1)",
                        [&old],
                        |row| row.get::<_, i64>(0),
                    )
                    .map(|v| v != 0)?;
                if !still_used {
                    db::release_head_sync(conn, &old)?;
                }
            }

            Ok(outcome)
        })
        .await?;

    Ok(match outcome {
        UpsertOutcome::Added => FileOutcome::Added,
        UpsertOutcome::Updated => FileOutcome::Updated,
    })
}

/// Aggregated counters for a full pass over every enabled context.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSummary {
    pub contexts_indexed: usize,
    pub outcome: IndexOutcome,
}

/// Index every enabled context, then sync version history for contexts
/// with a provider, then run content eviction.
pub async fn index_all_contexts(
    pool: &Arc<DatabasePool>,
    extractors: &ExtractorRegistry,
    config: &ApprenticeConfig,
) -> Result<IndexSummary> {
    let contexts = pool
        .interact(|conn| Ok(db::list_contexts_sync(conn, true)?))
        .await?;

    let mut summary = IndexSummary::default();
    for ctx in &contexts {
        match index_context(pool, extractors, config, ctx).await {
            Ok(outcome) => {
                summary.contexts_indexed += 1;
                summary.outcome.files_added += outcome.files_added;
                summary.outcome.files_updated += outcome.files_updated;
                summary.outcome.files_skipped += outcome.files_skipped;
                summary.outcome.errors += outcome.errors;
            }
            Err(e) => {
                summary.outcome.errors += 1;
                tracing::warn!(context = %ctx.id, "Indexing pass failed: {:#}", e);
            }
        }

        if ctx.version_provider_type.is_some() {
            if let Err(e) = crate::versioning::sync::sync_context(pool, ctx).await {
                tracing::warn!(context = %ctx.id, "Version sync failed: {:#}", e);
            }
        }
    }

    let stats = pool
        .interact(|conn| {
            Ok(db::evict_unreferenced_sync(
                conn,
                crate::versioning::sync::EVICTION_THRESHOLD_DAYS,
                crate::versioning::sync::EVICTION_BATCH_SIZE,
            )?)
        })
        .await?;
    if stats.rows_evicted > 0 {
        tracing::info!(
            rows = stats.rows_evicted,
            bytes = stats.bytes_freed,
            "Evicted unreferenced content"
        );
    }

    Ok(summary)
}
