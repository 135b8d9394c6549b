// crates/apprentice-server/src/search/related.rs
// Related-context resolution: group-by-metadata or temporal-window
// expansion around an event, plus referenced-asset lookup

use crate::db::{self, AssetRow, DatabasePool, EventRow, parse_event_row};
use crate::metadata::get_path;
use anyhow::Result;
use rusqlite::params;
use std::sync::Arc;

/// Default half-width of the temporal window.
pub const DEFAULT_WINDOW_SECONDS: i64 = 300;

/// Default number of related events returned.
pub const DEFAULT_RELATED_LIMIT: usize = 10;

/// Caller-supplied grouping strategy.
#[derive(Debug, Clone, Default)]
pub struct RelatedStrategy {
    /// Dot-path into event metadata whose value forms the group.
    pub group_by: Option<String>,
    /// `timestamp` (default) or `id`.
    pub order_by: Option<String>,
    /// `asc` (default) or `desc`.
    pub direction: Option<String>,
}

/// Which expansion produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyUsed {
    Grouped,
    Temporal,
}

impl StrategyUsed {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyUsed::Grouped => "grouped",
            StrategyUsed::Temporal => "temporal",
        }
    }
}

/// Related events and the assets they reference.
#[derive(Debug, Clone)]
pub struct RelatedContext {
    pub events: Vec<EventRow>,
    pub assets: Vec<AssetRow>,
    pub strategy_used: StrategyUsed,
}

/// Resolve the related context of one event.
///
/// A configured groupBy path is tried first; an empty group (or no
/// strategy) falls back to events within ±window seconds ordered by
/// temporal distance.
pub async fn get_related_context(
    pool: &Arc<DatabasePool>,
    event: &EventRow,
    strategy: Option<&RelatedStrategy>,
    window_seconds: i64,
    limit: usize,
) -> Result<RelatedContext> {
    let mut grouped: Option<Vec<EventRow>> = None;

    if let Some(strategy) = strategy {
        if let Some(ref group_by) = strategy.group_by {
            if let Some(value) = get_path(&event.metadata, group_by) {
                let peers = group_events(pool, event, group_by, value, strategy, limit).await?;
                if !peers.is_empty() {
                    grouped = Some(peers);
                }
            }
        }
    }

    let (events, strategy_used) = match grouped {
        Some(events) => (events, StrategyUsed::Grouped),
        None => (
            window_events(pool, event, window_seconds, limit).await?,
            StrategyUsed::Temporal,
        ),
    };

    let assets = collect_assets(pool, &events).await?;
    Ok(RelatedContext {
        events,
        assets,
        strategy_used,
    })
}

async fn group_events(
    pool: &Arc<DatabasePool>,
    event: &EventRow,
    group_by: &str,
    value: &serde_json::Value,
    strategy: &RelatedStrategy,
    limit: usize,
) -> Result<Vec<EventRow>> {
    // the order column is whitelisted, never interpolated from user input
    let order_column = match strategy.order_by.as_deref() {
        None | Some("timestamp") => "timestamp",
        Some("id") => "id",
        Some(other) => {
            anyhow::bail!("unsupported orderBy {other:?}");
        }
    };
    let descending = matches!(strategy.direction.as_deref(), Some("desc"));
    let order_dir = if descending { "DESC" } else { "ASC" };

    let json_path = format!("$.{group_by}");
    // bind with the value's own type so json_extract equality holds
    let expected: rusqlite::types::Value = match value {
        serde_json::Value::String(s) => s.clone().into(),
        serde_json::Value::Number(n) if n.is_i64() => n.as_i64().unwrap_or_default().into(),
        serde_json::Value::Number(n) => n.as_f64().unwrap_or_default().into(),
        serde_json::Value::Bool(b) => (*b as i64).into(),
        other => other.to_string().into(),
    };
    let event_id = event.id.clone();
    let sql = format!(
        "SELECT id, timestamp, message, metadata FROM events
         WHERE id != ?1 AND json_extract(metadata, ?2) = ?3
         ORDER BY {order_column} {order_dir}
         LIMIT ?4"
    );

    pool.interact(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![event_id, json_path, expected, limit as i64],
            parse_event_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
    .await
}

async fn window_events(
    pool: &Arc<DatabasePool>,
    event: &EventRow,
    window_seconds: i64,
    limit: usize,
) -> Result<Vec<EventRow>> {
    let event_id = event.id.clone();
    let center = event.timestamp.clone();
    let window_days = window_seconds as f64 / 86_400.0;

    pool.interact(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, message, metadata FROM events
             WHERE id != ?1
               AND julianday(timestamp) >= julianday(?2) - ?3
               AND julianday(timestamp) <= julianday(?2) + ?3
             ORDER BY ABS(julianday(timestamp) - julianday(?2)) ASC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![event_id, center, window_days, limit as i64],
            parse_event_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    })
    .await
}

/// Pull asset ids referenced by the events: `metadata.relations[].asset_id`
/// and `metadata.asset.id`.
async fn collect_assets(pool: &Arc<DatabasePool>, events: &[EventRow]) -> Result<Vec<AssetRow>> {
    let mut ids: Vec<String> = Vec::new();
    for event in events {
        if let Some(relations) = event.metadata.get("relations").and_then(|r| r.as_array()) {
            for relation in relations {
                if let Some(id) = relation.get("asset_id").and_then(|v| v.as_str()) {
                    ids.push(id.to_string());
                }
            }
        }
        if let Some(id) = get_path(&event.metadata, "asset.id").and_then(|v| v.as_str()) {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(vec![]);
    }

    pool.interact(move |conn| Ok(db::get_assets_by_ids_sync(conn, &ids)?))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_event(pool: &Arc<DatabasePool>, id: &str, ts: &str, metadata: serde_json::Value) {
        let event = EventRow {
            id: id.into(),
            timestamp: ts.into(),
            message: format!("event {id}"),
            metadata,
        };
        pool.interact(move |conn| Ok(db::insert_event_sync(conn, &event)?))
            .await
            .unwrap();
    }

    async fn get(pool: &Arc<DatabasePool>, id: &str) -> EventRow {
        let id = id.to_string();
        pool.interact(move |conn| Ok(db::get_event_sync(conn, &id)?))
            .await
            .unwrap()
            .unwrap()
    }

    fn session(s: &str) -> serde_json::Value {
        serde_json::json!({"chat": {"session_id": s}})
    }

    #[tokio::test]
    async fn test_group_by_returns_session_peers_ascending() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        insert_event(&pool, "s0", "2024-06-01T10:00:00Z", session("S")).await;
        insert_event(&pool, "s1", "2024-06-01T10:01:00Z", session("S")).await;
        insert_event(&pool, "s2", "2024-06-01T10:02:00Z", session("S")).await;
        insert_event(&pool, "t0", "2024-06-01T10:01:00Z", session("T")).await;

        let event = get(&pool, "s0").await;
        let strategy = RelatedStrategy {
            group_by: Some("chat.session_id".into()),
            ..Default::default()
        };
        let related = get_related_context(&pool, &event, Some(&strategy), 300, 10)
            .await
            .unwrap();

        assert_eq!(related.strategy_used, StrategyUsed::Grouped);
        let ids: Vec<&str> = related.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_group_by_descending_direction() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        insert_event(&pool, "s0", "2024-06-01T10:00:00Z", session("S")).await;
        insert_event(&pool, "s1", "2024-06-01T10:01:00Z", session("S")).await;
        insert_event(&pool, "s2", "2024-06-01T10:02:00Z", session("S")).await;

        let event = get(&pool, "s0").await;
        let strategy = RelatedStrategy {
            group_by: Some("chat.session_id".into()),
            direction: Some("desc".into()),
            ..Default::default()
        };
        let related = get_related_context(&pool, &event, Some(&strategy), 300, 10)
            .await
            .unwrap();
        let ids: Vec<&str> = related.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[tokio::test]
    async fn test_temporal_fallback_orders_by_distance() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        insert_event(&pool, "center", "2024-06-01T10:00:00Z", serde_json::json!({})).await;
        insert_event(&pool, "near", "2024-06-01T10:00:30Z", serde_json::json!({})).await;
        insert_event(&pool, "far", "2024-06-01T10:03:00Z", serde_json::json!({})).await;
        insert_event(&pool, "outside", "2024-06-01T11:00:00Z", serde_json::json!({})).await;

        let event = get(&pool, "center").await;
        let related = get_related_context(&pool, &event, None, 300, 10).await.unwrap();

        assert_eq!(related.strategy_used, StrategyUsed::Temporal);
        let ids: Vec<&str> = related.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[tokio::test]
    async fn test_empty_group_falls_back_to_temporal() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        insert_event(&pool, "only", "2024-06-01T10:00:00Z", session("S")).await;
        insert_event(&pool, "near", "2024-06-01T10:00:10Z", serde_json::json!({})).await;

        let event = get(&pool, "only").await;
        let strategy = RelatedStrategy {
            group_by: Some("chat.session_id".into()),
            ..Default::default()
        };
        let related = get_related_context(&pool, &event, Some(&strategy), 300, 10)
            .await
            .unwrap();
        assert_eq!(related.strategy_used, StrategyUsed::Temporal);
        assert_eq!(related.events.len(), 1);
    }

    #[tokio::test]
    async fn test_referenced_assets_resolved() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        pool.interact(|conn| {
            conn.execute(
                "INSERT INTO contexts (id, name, path, registered_at) VALUES ('c', 'c', '/p', 't')",
                [],
            )?;
            conn.execute(
                "INSERT INTO assets (id, context_id, key, indexed_at, metadata)
                 VALUES ('asset-1', 'c', 'deploy.sh', 't', '{}')",
                [],
            )?;
            conn.execute(
                "INSERT INTO assets (id, context_id, key, indexed_at, metadata)
                 VALUES ('asset-2', 'c', 'notes.md', 't', '{}')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        insert_event(&pool, "center", "2024-06-01T10:00:00Z", serde_json::json!({})).await;
        insert_event(
            &pool,
            "linked",
            "2024-06-01T10:00:10Z",
            serde_json::json!({
                "relations": [{"asset_id": "asset-1"}],
                "asset": {"id": "asset-2"}
            }),
        )
        .await;

        let event = get(&pool, "center").await;
        let related = get_related_context(&pool, &event, None, 300, 10).await.unwrap();
        let mut asset_ids: Vec<&str> = related.assets.iter().map(|a| a.id.as_str()).collect();
        asset_ids.sort();
        assert_eq!(asset_ids, vec!["asset-1", "asset-2"]);
    }
}
