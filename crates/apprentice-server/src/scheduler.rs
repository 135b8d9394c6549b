// crates/apprentice-server/src/scheduler.rs
// Periodic ticks: indexing, chat import, WAL checkpoints, shutdown

use crate::config::{ApprenticeConfig, ApprenticeHome};
use crate::db::{CheckpointMode, DatabasePool};
use crate::embeddings::{self, EmbeddingClient};
use crate::indexer::{self, chat_import::ChatSourceAdapter};
use crate::metadata::extractors::ExtractorRegistry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Rows embedded per tick and per corpus.
const EMBED_BATCH: usize = 100;

/// WAL checkpoint cadence.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Everything the daemon loop needs.
pub struct Scheduler {
    pub pool: Arc<DatabasePool>,
    pub config: ApprenticeConfig,
    pub home: ApprenticeHome,
    pub extractors: ExtractorRegistry,
    pub embedder: Option<EmbeddingClient>,
    pub adapters: Vec<Box<dyn ChatSourceAdapter>>,
}

impl Scheduler {
    /// Run until SIGINT/SIGTERM, then checkpoint at TRUNCATE and return.
    ///
    /// Each tick kind runs to completion before its next firing is
    /// scheduled; a missed tick is delayed, never stacked.
    pub async fn run(mut self) -> Result<()> {
        // startup cycle: one full ingest, one chat import, one embed pass
        self.ingest_cycle().await;
        if self.config.chat_import.enabled {
            self.chat_import_tick().await;
        }
        self.embedding_pass().await;

        let mut indexing = tokio::time::interval(Duration::from_millis(
            self.config.indexer.sync_interval.max(1_000),
        ));
        indexing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        indexing.tick().await; // the immediate first tick; startup already ran

        let mut chat = tokio::time::interval(Duration::from_millis(
            self.config.chat_import.interval_ms.max(10_000),
        ));
        chat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        chat.tick().await;

        let mut checkpoint = tokio::time::interval(CHECKPOINT_INTERVAL);
        checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);
        checkpoint.tick().await;

        loop {
            tokio::select! {
                _ = indexing.tick() => self.indexing_tick().await,
                _ = chat.tick(), if self.config.chat_import.enabled => {
                    self.chat_import_tick().await
                }
                _ = checkpoint.tick() => self.checkpoint_tick().await,
                _ = shutdown_signal() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        match self.pool.checkpoint(CheckpointMode::Truncate).await {
            Ok(pages) => tracing::info!(pages, "Final WAL checkpoint complete"),
            Err(e) => tracing::warn!("Final checkpoint failed: {:#}", e),
        }
        Ok(())
    }

    /// Indexing tick: assets, event logs, then embedding top-up.
    async fn indexing_tick(&mut self) {
        let summary = self.ingest_cycle().await;
        let embedded = self.embedding_pass().await;
        if summary > 0 || embedded > 0 {
            tracing::info!(changed = summary, embedded, "Indexing tick complete");
        }
    }

    /// One ingest cycle. Returns changed-row count for logging.
    async fn ingest_cycle(&mut self) -> usize {
        let mut changed = 0usize;

        match indexer::index_all_contexts(&self.pool, &self.extractors, &self.config).await {
            Ok(summary) => changed += summary.outcome.changed(),
            Err(e) => tracing::warn!("Context indexing failed: {:#}", e),
        }

        for (path, source) in [
            (self.home.bash_log_path(), "bash"),
            (self.home.chat_log_path(), "chat"),
        ] {
            match indexer::log_ingest::process_log(&self.pool, &path, source).await {
                Ok(count) => changed += count,
                Err(e) => tracing::warn!(source, "Event log ingest failed: {:#}", e),
            }
        }

        changed
    }

    /// Generate missing embeddings for both corpora.
    async fn embedding_pass(&self) -> usize {
        let Some(ref client) = self.embedder else {
            return 0;
        };
        let mut embedded = 0usize;
        match embeddings::generate_asset_embeddings(&self.pool, client, EMBED_BATCH).await {
            Ok(count) => embedded += count,
            Err(e) => tracing::warn!("Asset embedding pass failed: {:#}", e),
        }
        match embeddings::generate_event_embeddings(&self.pool, client, EMBED_BATCH).await {
            Ok(count) => embedded += count,
            Err(e) => tracing::warn!("Event embedding pass failed: {:#}", e),
        }
        embedded
    }

    async fn chat_import_tick(&mut self) {
        match indexer::chat_import::run_chat_import(
            &self.pool,
            &self.config.chat_import,
            &self.adapters,
            &self.home.chat_log_path(),
        )
        .await
        {
            Ok(count) if count > 0 => tracing::info!(events = count, "Chat import complete"),
            Ok(_) => {}
            Err(e) => tracing::warn!("Chat import failed: {:#}", e),
        }
    }

    async fn checkpoint_tick(&self) {
        match self.pool.checkpoint(CheckpointMode::Passive).await {
            Ok(pages) if pages > 0 => tracing::info!(pages, "WAL checkpoint"),
            Ok(_) => {}
            Err(e) => tracing::warn!("WAL checkpoint failed: {:#}", e),
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
