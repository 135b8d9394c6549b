// crates/apprentice-server/src/cli/mod.rs
// Command-line surface: thin wrappers over the library

use apprentice::config::{ApprenticeConfig, ApprenticeHome};
use apprentice::db::DatabasePool;
use apprentice::embeddings::EmbeddingClient;
use apprentice::indexer::chat_import::{ChatSourceAdapter, CopilotAdapter};
use apprentice::metadata::extractors::ExtractorRegistry;
use apprentice::registry::{self, AddContextOptions};
use apprentice::scheduler::Scheduler;
use apprentice::search::{
    self, SearchItem, SearchMode, SearchOptions, SearchScope,
};
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "apprentice", about = "Personal knowledge indexer", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the indexing daemon
    Serve,
    /// Run one indexing pass and exit
    Index {
        /// Restrict to one context id
        #[arg(long)]
        context: Option<String>,
    },
    /// Manage registered contexts
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
    /// Search events and assets
    Search {
        query: Vec<String>,
        /// fts, vector, or hybrid
        #[arg(long)]
        mode: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Search only events
        #[arg(long)]
        events: bool,
        /// Search only assets
        #[arg(long)]
        assets: bool,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        recent_minutes: Option<i64>,
        /// Dot-path equality filter, `key=value`; repeatable
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Restrict to context ids; repeatable
        #[arg(long = "context")]
        contexts: Vec<String>,
        /// Restrict to extensions; repeatable
        #[arg(long = "extension")]
        extensions: Vec<String>,
        /// Expand related context for event hits
        #[arg(long)]
        related: bool,
        /// Group related events by this metadata dot-path
        #[arg(long)]
        group_by: Option<String>,
        #[arg(long)]
        window_seconds: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum ContextAction {
    /// Register a folder
    Add {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        /// Include glob; repeatable
        #[arg(long = "include")]
        include: Vec<String>,
        /// Exclude glob; repeatable
        #[arg(long = "exclude")]
        exclude: Vec<String>,
        /// Skip version-provider detection
        #[arg(long)]
        no_versioning: bool,
        /// Sync only this branch
        #[arg(long)]
        branch: Option<String>,
    },
    /// List registered contexts
    List,
    Enable { id: String },
    Disable { id: String },
    Remove { id: String },
    /// Mount an external directory under a key prefix
    Mount {
        id: String,
        path: PathBuf,
        mount: String,
    },
    /// Remove a mount by prefix or path
    Unmount { id: String, mount: String },
}

async fn open_pool(home: &ApprenticeHome) -> Result<Arc<DatabasePool>> {
    Ok(Arc::new(
        DatabasePool::open(&home.db_path())
            .await
            .context("Failed to open the index database")?,
    ))
}

/// `apprentice serve`: ensure the legacy scripts context, write the pid
/// file, run the scheduler until a shutdown signal.
pub async fn run_serve(home: ApprenticeHome, config: ApprenticeConfig) -> Result<()> {
    let pool = open_pool(&home).await?;

    // the legacy scripts directory is indexed as an ordinary context
    let scripts = home.scripts_dir();
    if scripts.is_dir() {
        match registry::add_context(
            &pool,
            &scripts,
            AddContextOptions {
                name: Some("scripts".into()),
                no_versioning: true,
                ..Default::default()
            },
        )
        .await
        {
            Ok(ctx) => tracing::info!(context = %ctx.id, "Registered scripts context"),
            Err(apprentice::ApprenticeError::InvalidInput(_)) => {} // already registered
            Err(e) => tracing::warn!("Could not register scripts context: {}", e),
        }
    }

    if let Err(e) = std::fs::write(home.pid_path(), std::process::id().to_string()) {
        tracing::warn!("Could not write pid file: {}", e);
    }

    let embedder = EmbeddingClient::from_config(&config);
    let adapters: Vec<Box<dyn ChatSourceAdapter>> = match CopilotAdapter::default_location() {
        Some(adapter) if config.chat_import.enabled => vec![Box::new(adapter)],
        _ => vec![],
    };

    let scheduler = Scheduler {
        pool,
        config,
        home: home.clone(),
        extractors: ExtractorRegistry::with_builtins(),
        embedder,
        adapters,
    };
    let result = scheduler.run().await;
    let _ = std::fs::remove_file(home.pid_path());
    result
}

/// `apprentice index`: one pass over all (or one) contexts.
pub async fn run_index(
    home: ApprenticeHome,
    config: ApprenticeConfig,
    context: Option<String>,
) -> Result<()> {
    let pool = open_pool(&home).await?;
    let extractors = ExtractorRegistry::with_builtins();

    match context {
        Some(id) => {
            let ctx = registry::get_context(&pool, &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("context {id:?} is not registered"))?;
            let outcome = apprentice::indexer::index_context(&pool, &extractors, &config, &ctx).await?;
            println!(
                "{}: {} added, {} updated, {} skipped, {} errors",
                id, outcome.files_added, outcome.files_updated, outcome.files_skipped, outcome.errors
            );
        }
        None => {
            let summary = apprentice::indexer::index_all_contexts(&pool, &extractors, &config).await?;
            println!(
                "{} contexts: {} added, {} updated, {} skipped, {} errors",
                summary.contexts_indexed,
                summary.outcome.files_added,
                summary.outcome.files_updated,
                summary.outcome.files_skipped,
                summary.outcome.errors
            );
        }
    }
    Ok(())
}

pub async fn run_context(home: ApprenticeHome, action: ContextAction) -> Result<()> {
    let pool = open_pool(&home).await?;
    match action {
        ContextAction::Add {
            path,
            name,
            include,
            exclude,
            no_versioning,
            branch,
        } => {
            let ctx = registry::add_context(
                &pool,
                &path,
                AddContextOptions {
                    name,
                    include,
                    exclude,
                    no_versioning,
                    version_branch: branch,
                },
            )
            .await?;
            println!(
                "registered {} at {}{}",
                ctx.id,
                ctx.path,
                ctx.version_provider_type
                    .as_deref()
                    .map(|p| format!(" ({p} history)"))
                    .unwrap_or_default()
            );
        }
        ContextAction::List => {
            for ctx in registry::list_contexts(&pool).await? {
                println!(
                    "{}\t{}\t{}{}",
                    ctx.id,
                    if ctx.enabled { "enabled" } else { "disabled" },
                    ctx.path,
                    if ctx.mounts.is_empty() {
                        String::new()
                    } else {
                        format!(" (+{} mounts)", ctx.mounts.len())
                    }
                );
            }
        }
        ContextAction::Enable { id } => {
            anyhow::ensure!(
                registry::set_enabled(&pool, &id, true).await?,
                "context {id:?} is not registered"
            );
            println!("enabled {id}");
        }
        ContextAction::Disable { id } => {
            anyhow::ensure!(
                registry::set_enabled(&pool, &id, false).await?,
                "context {id:?} is not registered"
            );
            println!("disabled {id}");
        }
        ContextAction::Remove { id } => {
            anyhow::ensure!(
                registry::remove_context(&pool, &id).await?,
                "context {id:?} is not registered"
            );
            println!("removed {id}");
        }
        ContextAction::Mount { id, path, mount } => {
            registry::add_mount(&pool, &id, &path, &mount).await?;
            println!("mounted {} under {id}/{}", path.display(), mount.trim_matches('/'));
        }
        ContextAction::Unmount { id, mount } => {
            anyhow::ensure!(
                registry::remove_mount(&pool, &id, &mount).await?,
                "no such mount in {id:?}"
            );
            println!("unmounted {mount} from {id}");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_search(
    home: ApprenticeHome,
    config: ApprenticeConfig,
    query: Vec<String>,
    mode: Option<String>,
    limit: usize,
    offset: usize,
    events: bool,
    assets: bool,
    since: Option<String>,
    until: Option<String>,
    recent_minutes: Option<i64>,
    filters: Vec<String>,
    contexts: Vec<String>,
    extensions: Vec<String>,
    related: bool,
    group_by: Option<String>,
    window_seconds: Option<i64>,
) -> Result<()> {
    let pool = open_pool(&home).await?;
    let embedder = EmbeddingClient::from_config(&config);
    let query_text = query.join(" ");

    let mode = match mode {
        Some(m) => Some(
            SearchMode::from_str(&m)
                .ok_or_else(|| anyhow::anyhow!("unknown mode {m:?} (fts|vector|hybrid)"))?,
        ),
        None => None,
    };

    let mut opts = SearchOptions {
        mode,
        limit,
        offset,
        scope: match (events, assets) {
            (false, false) => SearchScope::default(),
            (events, assets) => SearchScope { events, assets },
        },
        related,
        window_seconds,
        ..Default::default()
    };
    opts.filters.since = since;
    opts.filters.until = until;
    opts.filters.recent_minutes = recent_minutes;
    opts.filters.context_ids = contexts;
    opts.filters.extensions = extensions;
    if let Some(group_by) = group_by {
        opts.strategy = Some(apprentice::search::related::RelatedStrategy {
            group_by: Some(group_by),
            ..Default::default()
        });
    }
    let parsed: Vec<(String, String)> = filters
        .iter()
        .map(|f| {
            f.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("filter {f:?} is not key=value"))
        })
        .collect::<Result<_>>()?;
    opts.apply_raw_filters(parsed);

    let response = search::run_search(&pool, &config, embedder.as_ref(), &query_text, &opts).await?;

    println!(
        "{} results ({} total) in {}ms [mode: {}{}]",
        response.results.len(),
        response.total,
        response.duration_ms,
        response.mode.as_str(),
        if response.embeddings_available { "" } else { ", no embeddings" },
    );
    for result in &response.results {
        match &result.item {
            SearchItem::Event(event) => {
                println!(
                    "  {:.4} [{}] event {} {} {}",
                    result.score,
                    result.match_type.as_str(),
                    event.timestamp,
                    event.id,
                    apprentice::utils::truncate(&event.message, 80)
                );
                if let Some(ref related) = result.related {
                    println!(
                        "        related: {} events, {} assets ({})",
                        related.events.len(),
                        related.assets.len(),
                        related.strategy_used.as_str()
                    );
                }
            }
            SearchItem::Asset(asset) => {
                println!(
                    "  {:.4} [{}] asset {}/{}",
                    result.score,
                    result.match_type.as_str(),
                    asset.context_id,
                    asset.key
                );
            }
            SearchItem::Version(hit) => {
                println!(
                    "  {:.4} [{}] version {}/{} @ {}",
                    result.score,
                    result.match_type.as_str(),
                    hit.context_id,
                    hit.key,
                    hit.version_ref_id.as_deref().unwrap_or("head")
                );
            }
        }
    }
    Ok(())
}
