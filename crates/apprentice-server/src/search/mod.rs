// crates/apprentice-server/src/search/mod.rs
// The Search() surface: per-corpus retrieval, fusion, pagination, and
// optional related-context expansion

pub mod filters;
pub mod hybrid;
pub mod query;
pub mod related;

use crate::config::{ApprenticeConfig, HybridWeights};
use crate::db::{
    self, AssetRow, DatabasePool, EmbeddingCorpus, EventRow,
    search::{VersionHit, fts_search_version_content_sync, fts_search_version_history_sync},
};
use crate::embeddings::EmbeddingClient;
use anyhow::Result;
use filters::SearchFilters;
use hybrid::{ChannelHit, FusedHit, MatchType};
use related::{RelatedContext, RelatedStrategy};
use std::sync::Arc;
use std::time::Instant;

/// Retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Fts,
    Vector,
    Hybrid,
}

impl SearchMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fts" => Some(Self::Fts),
            "vector" => Some(Self::Vector),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fts => "fts",
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Which corpora a query touches.
#[derive(Debug, Clone, Copy)]
pub struct SearchScope {
    pub events: bool,
    pub assets: bool,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self {
            events: true,
            assets: true,
        }
    }
}

/// Version-history filters, split out of the generic metadata filters.
#[derive(Debug, Clone, Default)]
pub struct VersionFilters {
    /// Full or short ref id; switches asset search to version content.
    pub ref_id: Option<String>,
    /// Search all historical content unioned with current heads.
    pub history: bool,
    /// Restrict to refs at or before this RFC 3339 time.
    pub before: Option<String>,
    /// Accepted for interface compatibility; listing is branch-agnostic
    /// once refs are synced.
    pub branch: Option<String>,
}

impl VersionFilters {
    pub fn active(&self) -> bool {
        self.ref_id.is_some() || self.history
    }
}

/// Options for one search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: Option<SearchMode>,
    pub limit: usize,
    pub offset: usize,
    pub scope: SearchScope,
    pub filters: SearchFilters,
    pub version: VersionFilters,
    pub hybrid_weights: Option<HybridWeights>,
    pub related: bool,
    pub strategy: Option<RelatedStrategy>,
    pub window_seconds: Option<i64>,
    pub related_limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: None,
            limit: 10,
            offset: 0,
            scope: SearchScope::default(),
            filters: SearchFilters::default(),
            version: VersionFilters::default(),
            hybrid_weights: None,
            related: false,
            strategy: None,
            window_seconds: None,
            related_limit: None,
        }
    }
}

impl SearchOptions {
    /// Split a raw dot-path filter map into version filters and metadata
    /// equality filters (`version.*` keys are special-cased).
    pub fn apply_raw_filters(&mut self, raw: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in raw {
            match key.as_str() {
                "version.ref" => self.version.ref_id = Some(value),
                "version.history" => self.version.history = value == "true",
                "version.before" => self.version.before = Some(value),
                "version.branch" => self.version.branch = Some(value),
                _ => self.filters.metadata.push((key, value)),
            }
        }
    }
}

/// One searchable row.
#[derive(Debug, Clone)]
pub enum SearchItem {
    Event(EventRow),
    Asset(AssetRow),
    Version(VersionHit),
}

impl SearchItem {
    fn fusion_id(&self) -> String {
        match self {
            SearchItem::Event(e) => format!("event:{}", e.id),
            SearchItem::Asset(a) => format!("asset:{}", a.id),
            SearchItem::Version(v) => format!(
                "version:{}:{}:{}",
                v.context_id,
                v.key,
                v.version_ref_id.as_deref().unwrap_or("head")
            ),
        }
    }

    /// Text the exact-term boost matches against.
    fn match_text(&self) -> String {
        match self {
            SearchItem::Event(e) => e.message.clone(),
            SearchItem::Asset(a) => format!("{} {}", a.id, a.key),
            SearchItem::Version(v) => v.key.clone(),
        }
    }
}

/// One scored search result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub item: SearchItem,
    pub score: f64,
    pub match_type: MatchType,
    pub fts_score: Option<f64>,
    pub vector_distance: Option<f64>,
    pub related: Option<RelatedContext>,
}

/// The response envelope.
#[derive(Debug)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub mode: SearchMode,
    pub duration_ms: u128,
    pub embeddings_available: bool,
}

/// Run one search.
pub async fn run_search(
    pool: &Arc<DatabasePool>,
    config: &ApprenticeConfig,
    embedder: Option<&EmbeddingClient>,
    query_text: &str,
    opts: &SearchOptions,
) -> Result<SearchResponse> {
    let started = Instant::now();

    let requested = opts.mode.unwrap_or_else(|| {
        SearchMode::from_str(&config.search.default_mode).unwrap_or(SearchMode::Hybrid)
    });
    let weights = opts.hybrid_weights.unwrap_or(config.search.hybrid_weights);
    let match_expr = query::build_match_expr(query_text);
    let terms = query::extract_query_terms(query_text);

    let channel_limit = opts.limit + opts.offset;
    let fetch_limit = opts.filters.fetch_limit(channel_limit);

    // vector availability per corpus: a configured provider plus rows
    let (events_rows, assets_rows) = pool
        .interact(|conn| {
            Ok((
                db::embeddings_available_sync(conn, EmbeddingCorpus::Events)?,
                db::embeddings_available_sync(conn, EmbeddingCorpus::Assets)?,
            ))
        })
        .await?;
    let events_vectors = embedder.is_some() && events_rows;
    let assets_vectors = embedder.is_some() && assets_rows;

    // one query embedding shared by both corpora; a failure degrades to FTS
    let wants_vectors = requested != SearchMode::Fts
        && match_expr.is_some()
        && ((opts.scope.events && events_vectors) || (opts.scope.assets && assets_vectors));
    let query_vec_json = if wants_vectors {
        match embedder {
            Some(client) => match client.embed(query_text).await {
                Ok(vector) => serde_json::to_string(&vector).ok(),
                Err(e) => {
                    tracing::warn!("Query embedding failed, degrading to FTS: {:#}", e);
                    None
                }
            },
            None => None,
        }
    } else {
        None
    };

    let mut fused: Vec<FusedHit<SearchItem>> = Vec::new();
    let mut any_vector_channel = false;

    if opts.scope.events {
        let fts = fetch_event_fts(pool, match_expr.clone(), fetch_limit, opts, channel_limit).await?;
        let vector = match (&query_vec_json, events_vectors) {
            (Some(json), true) => {
                fetch_event_vector(pool, json.clone(), fetch_limit, opts, channel_limit).await?
            }
            _ => vec![],
        };
        any_vector_channel |= !vector.is_empty();
        fused.extend(fuse_corpus(requested, fts, vector, weights, &terms));
    }

    if opts.scope.assets {
        if opts.version.active() {
            // version-content search is FTS-only
            let hits = fetch_version_fts(pool, match_expr.clone(), fetch_limit, opts, channel_limit)
                .await?;
            fused.extend(hybrid::normalize_fts(hits));
        } else {
            let fts =
                fetch_asset_fts(pool, match_expr.clone(), fetch_limit, opts, channel_limit).await?;
            let vector = match (&query_vec_json, assets_vectors) {
                (Some(json), true) => {
                    fetch_asset_vector(pool, json.clone(), fetch_limit, opts, channel_limit).await?
                }
                _ => vec![],
            };
            any_vector_channel |= !vector.is_empty();
            fused.extend(fuse_corpus(requested, fts, vector, weights, &terms));
        }
    }

    // stable sort: equal scores keep channel order (recency for empty queries)
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let total = fused.len();
    let page = hybrid::paginate(fused, opts.offset, opts.limit);

    let mut results = Vec::with_capacity(page.len());
    for hit in page {
        let related = match (&hit.item, opts.related) {
            (SearchItem::Event(event), true) => Some(
                related::get_related_context(
                    pool,
                    event,
                    opts.strategy.as_ref(),
                    opts.window_seconds.unwrap_or(related::DEFAULT_WINDOW_SECONDS),
                    opts.related_limit.unwrap_or(related::DEFAULT_RELATED_LIMIT),
                )
                .await?,
            ),
            _ => None,
        };
        results.push(SearchResult {
            item: hit.item,
            score: hit.score,
            match_type: hit.match_type,
            fts_score: hit.fts_score,
            vector_distance: hit.vector_distance,
            related,
        });
    }

    let embeddings_available = (opts.scope.events && events_vectors)
        || (opts.scope.assets && assets_vectors && !opts.version.active());
    let mode = if requested != SearchMode::Fts && !any_vector_channel {
        SearchMode::Fts
    } else {
        requested
    };

    Ok(SearchResponse {
        results,
        total,
        mode,
        duration_ms: started.elapsed().as_millis(),
        embeddings_available,
    })
}

/// Fuse one corpus's channels according to the requested mode.
fn fuse_corpus(
    requested: SearchMode,
    fts: Vec<ChannelHit<SearchItem>>,
    vector: Vec<ChannelHit<SearchItem>>,
    weights: HybridWeights,
    terms: &[String],
) -> Vec<FusedHit<SearchItem>> {
    match requested {
        SearchMode::Fts => hybrid::normalize_fts(fts),
        SearchMode::Vector if !vector.is_empty() => hybrid::normalize_vector(vector),
        SearchMode::Hybrid if !vector.is_empty() => {
            hybrid::rrf_fuse(fts, vector, weights, terms, SearchItem::match_text)
        }
        // vector channel unavailable: degrade to fts
        _ => hybrid::normalize_fts(fts),
    }
}

async fn fetch_event_fts(
    pool: &Arc<DatabasePool>,
    match_expr: Option<String>,
    fetch_limit: usize,
    opts: &SearchOptions,
    channel_limit: usize,
) -> Result<Vec<ChannelHit<SearchItem>>> {
    let hits = pool
        .interact(move |conn| {
            Ok(db::search::fts_search_events_sync(
                conn,
                match_expr.as_deref(),
                fetch_limit,
            )?)
        })
        .await?;
    Ok(hits
        .into_iter()
        .filter(|h| opts.filters.matches_event(&h.event))
        .take(channel_limit)
        .map(|h| {
            let item = SearchItem::Event(h.event);
            ChannelHit {
                id: item.fusion_id(),
                item,
                raw: h.score,
            }
        })
        .collect())
}

async fn fetch_event_vector(
    pool: &Arc<DatabasePool>,
    query_json: String,
    fetch_limit: usize,
    opts: &SearchOptions,
    channel_limit: usize,
) -> Result<Vec<ChannelHit<SearchItem>>> {
    let hits = pool
        .interact(move |conn| {
            Ok(db::search::vector_search_events_sync(conn, &query_json, fetch_limit)?)
        })
        .await?;
    Ok(hits
        .into_iter()
        .filter(|(event, _)| opts.filters.matches_event(event))
        .take(channel_limit)
        .map(|(event, distance)| {
            let item = SearchItem::Event(event);
            ChannelHit {
                id: item.fusion_id(),
                item,
                raw: distance,
            }
        })
        .collect())
}

async fn fetch_asset_fts(
    pool: &Arc<DatabasePool>,
    match_expr: Option<String>,
    fetch_limit: usize,
    opts: &SearchOptions,
    channel_limit: usize,
) -> Result<Vec<ChannelHit<SearchItem>>> {
    let hits = pool
        .interact(move |conn| {
            Ok(db::search::fts_search_assets_sync(
                conn,
                match_expr.as_deref(),
                fetch_limit,
            )?)
        })
        .await?;
    Ok(hits
        .into_iter()
        .filter(|h| opts.filters.matches_asset(&h.asset))
        .take(channel_limit)
        .map(|h| {
            let item = SearchItem::Asset(h.asset);
            ChannelHit {
                id: item.fusion_id(),
                item,
                raw: h.score,
            }
        })
        .collect())
}

async fn fetch_asset_vector(
    pool: &Arc<DatabasePool>,
    query_json: String,
    fetch_limit: usize,
    opts: &SearchOptions,
    channel_limit: usize,
) -> Result<Vec<ChannelHit<SearchItem>>> {
    let hits = pool
        .interact(move |conn| {
            Ok(db::search::vector_search_assets_sync(conn, &query_json, fetch_limit)?)
        })
        .await?;
    Ok(hits
        .into_iter()
        .filter(|(asset, _)| opts.filters.matches_asset(asset))
        .take(channel_limit)
        .map(|(asset, distance)| {
            let item = SearchItem::Asset(asset);
            ChannelHit {
                id: item.fusion_id(),
                item,
                raw: distance,
            }
        })
        .collect())
}

/// Version-content FTS: at one ref, or across history unioned with heads.
async fn fetch_version_fts(
    pool: &Arc<DatabasePool>,
    match_expr: Option<String>,
    fetch_limit: usize,
    opts: &SearchOptions,
    channel_limit: usize,
) -> Result<Vec<ChannelHit<SearchItem>>> {
    let Some(expr) = match_expr else {
        return Ok(vec![]); // version search needs a query
    };

    let context_ids = if opts.filters.context_ids.is_empty() {
        pool.interact(|conn| Ok(db::list_contexts_sync(conn, false)?))
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect()
    } else {
        opts.filters.context_ids.clone()
    };

    let ref_id = opts.version.ref_id.clone();
    let history = opts.version.history;
    let before = opts.version.before.clone();

    let hits = pool
        .interact(move |conn| {
            let mut all: Vec<VersionHit> = Vec::new();
            for context_id in &context_ids {
                let mut hits = match (&ref_id, history) {
                    (Some(ref_id), _) => fts_search_version_content_sync(
                        conn,
                        &expr,
                        context_id,
                        ref_id,
                        fetch_limit,
                    )?,
                    (None, true) => {
                        fts_search_version_history_sync(conn, &expr, context_id, fetch_limit)?
                    }
                    (None, false) => vec![],
                };
                if let Some(ref before) = before {
                    hits.retain(|hit| match &hit.version_ref_id {
                        Some(ref_id) => db::get_version_ref_sync(conn, context_id, ref_id)
                            .ok()
                            .flatten()
                            .is_some_and(|r| r.timestamp.as_str() <= before.as_str()),
                        // current heads postdate any before cutoff
                        None => false,
                    });
                }
                all.extend(hits);
            }
            Ok(all)
        })
        .await?;

    let mut channel: Vec<ChannelHit<SearchItem>> = hits
        .into_iter()
        .map(|hit| {
            let raw = hit.score;
            let item = SearchItem::Version(hit);
            ChannelHit {
                id: item.fusion_id(),
                item,
                raw,
            }
        })
        .collect();
    channel.sort_by(|a, b| b.raw.partial_cmp(&a.raw).unwrap_or(std::cmp::Ordering::Equal));
    channel.truncate(channel_limit);
    Ok(channel)
}
