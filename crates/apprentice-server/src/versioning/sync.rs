// crates/apprentice-server/src/versioning/sync.rs
// Version sync: record refs, per-ref file states, and version content

use super::{ListRefsOptions, provider_by_type};
use crate::db::{self, ContextRow, DatabasePool, VersionStatus};
use crate::utils::now_rfc3339;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Maximum refs walked per sync pass.
pub const MAX_DEPTH: usize = 200;

/// Refs processed per transaction batch.
pub const BATCH_SIZE: usize = 20;

/// Blobs not read for this long become eviction candidates.
pub const EVICTION_THRESHOLD_DAYS: i64 = 30;

/// Blobs deleted per eviction pass.
pub const EVICTION_BATCH_SIZE: usize = 200;

/// Outcome of one sync pass.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub refs_processed: usize,
    pub errors: Vec<String>,
}

/// Sync a context's version history: walk new refs oldest-first, record
/// each ref, its diff rows and its content. Per-ref failures are collected
/// and the pass continues.
pub async fn sync_context(pool: &Arc<DatabasePool>, ctx: &ContextRow) -> Result<SyncOutcome> {
    let mut outcome = SyncOutcome::default();

    let context_id = ctx.id.clone();
    let provider_row = pool
        .interact(move |conn| Ok(db::get_provider_row_sync(conn, &context_id)?))
        .await?;
    let Some(provider_row) = provider_row else {
        return Ok(outcome);
    };
    let Some(provider) = provider_by_type(&provider_row.provider_type) else {
        tracing::warn!(
            context = %ctx.id,
            provider = %provider_row.provider_type,
            "Unknown version provider type"
        );
        return Ok(outcome);
    };

    let path = Path::new(&ctx.path);
    let branch = provider_row.config["branch"].as_str().map(str::to_string);
    let refs = provider.list_refs(
        path,
        &ListRefsOptions {
            branch,
            since: None,
            limit: Some(MAX_DEPTH),
        },
    )?;

    // refs are newest-first: keep those strictly newer than the cursor,
    // then reverse so parents are recorded before children
    let mut pending: Vec<_> = match provider_row.last_sync_ref.as_deref() {
        Some(last) => refs.into_iter().take_while(|r| r.id != last).collect(),
        None => refs,
    };
    pending.reverse();

    if pending.is_empty() {
        return Ok(outcome);
    }

    let mut newest_processed: Option<String> = None;
    for batch in pending.chunks(BATCH_SIZE) {
        for vref in batch {
            match sync_one_ref(pool, provider, ctx, vref).await {
                Ok(()) => {
                    outcome.refs_processed += 1;
                    newest_processed = Some(vref.id.clone());
                }
                Err(e) => {
                    outcome.errors.push(format!("{}: {e:#}", vref.id));
                    tracing::warn!(context = %ctx.id, ref_id = %vref.id, "Ref sync failed: {:#}", e);
                }
            }
        }
    }

    if let Some(newest) = newest_processed {
        let context_id = ctx.id.clone();
        let now = now_rfc3339();
        pool.interact(move |conn| {
            Ok(db::update_provider_sync(conn, &context_id, &newest, &now)?)
        })
        .await?;
    }

    if !outcome.errors.is_empty() {
        tracing::warn!(
            context = %ctx.id,
            failed = outcome.errors.len(),
            processed = outcome.refs_processed,
            "Version sync finished with errors"
        );
    }
    Ok(outcome)
}

async fn sync_one_ref(
    pool: &Arc<DatabasePool>,
    provider: &'static dyn super::VersionProvider,
    ctx: &ContextRow,
    vref: &db::VersionRefRow,
) -> Result<()> {
    let path = Path::new(&ctx.path);
    let parent = vref.parent_ids.first().map(String::as_str);
    let changes = provider.get_diff(path, parent, &vref.id)?;

    // resolve hashes and fetch content outside the write transaction
    let mut rows: Vec<(String, VersionStatus, Option<String>, String, Option<String>)> = Vec::new();
    for change in changes {
        if change.status == VersionStatus::Deleted {
            rows.push((change.key, change.status, change.renamed_from, String::new(), None));
            continue;
        }
        let hash = provider.get_content_hash(path, &change.key, &vref.id)?;
        let Some(hash) = hash else {
            // binary or unreadable content keeps the row, hash stays empty
            rows.push((change.key, change.status, change.renamed_from, String::new(), None));
            continue;
        };

        let exists = {
            let hash = hash.clone();
            pool.interact(move |conn| Ok(db::content_exists_sync(conn, &hash)?))
                .await?
        };
        let content = if exists {
            None
        } else {
            provider.get_content(path, &change.key, &vref.id)?
        };
        rows.push((change.key, change.status, change.renamed_from, hash, content));
    }

    let context_id = ctx.id.clone();
    let vref = vref.clone();
    pool.interact(move |conn| {
        let tx = conn.unchecked_transaction()?;
        db::insert_version_ref_sync(&tx, &context_id, &vref)?;
        for (key, status, renamed_from, hash, content) in &rows {
            db::insert_asset_version_sync(
                &tx,
                &context_id,
                key,
                &vref.id,
                hash,
                *status,
                renamed_from.as_deref(),
            )?;
            if !hash.is_empty() {
                if let Some(content) = content {
                    db::insert_content_blob_sync(&tx, hash, content)?;
                }
                db::insert_version_content_ref_sync(&tx, hash, &context_id, &vref.id)?;
            }
        }
        tx.commit()?;
        Ok(())
    })
    .await
}
