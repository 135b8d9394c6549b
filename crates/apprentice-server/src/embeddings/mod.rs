// crates/apprentice-server/src/embeddings/mod.rs
// Embedding client: provider selection, dimension bookkeeping, batch passes

mod ollama;
mod openai;

pub use self::ollama::OllamaEmbeddings;
pub use self::openai::OpenAiEmbeddings;

use crate::config::ApprenticeConfig;
use crate::db::{self, DatabasePool, UnembeddedAsset, UnembeddedEvent};
use crate::metadata::get_path;
use crate::utils::{now_rfc3339, truncate_at_boundary};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Asset embedding text is capped at this many characters.
const MAX_ASSET_TEXT_CHARS: usize = 4000;

/// Event output previews contribute at most this many characters.
const MAX_PREVIEW_CHARS: usize = 500;

/// One embedding backend. Two wire dialects ship built-in (the
/// OpenAI-compatible array dialect and Ollama's single-prompt dialect);
/// more can be added by extending `build_provider`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn model(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Known model dimensions; unknown models get theirs discovered on the
/// first embed call.
fn known_dimensions(model: &str) -> Option<usize> {
    match model {
        "all-minilm" | "all-minilm-l6-v2" => Some(384),
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" | "bge-m3" => Some(1024),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// Embedding client over a configured provider.
pub struct EmbeddingClient {
    provider: Box<dyn EmbeddingProvider>,
    /// 0 until known (from the table or the first embed call).
    dimensions: AtomicUsize,
    max_embed_chars: usize,
}

impl EmbeddingClient {
    /// Build from config. None when embeddings are disabled or the
    /// provider spec is unusable.
    pub fn from_config(config: &ApprenticeConfig) -> Option<Self> {
        if !config.embeddings.enabled {
            return None;
        }
        match build_provider(&config.embeddings.model) {
            Ok(provider) => {
                let dimensions = known_dimensions(provider.model()).unwrap_or(0);
                info!(
                    model = %config.embeddings.model,
                    dimensions = dimensions,
                    "Embedding provider configured"
                );
                Some(Self {
                    provider,
                    dimensions: AtomicUsize::new(dimensions),
                    max_embed_chars: config.indexer.max_embed_size as usize,
                })
            }
            Err(e) => {
                tracing::warn!("Embeddings disabled: {:#}", e);
                None
            }
        }
    }

    /// Wrap an explicit provider (tests use this with a stub).
    pub fn with_provider(provider: Box<dyn EmbeddingProvider>, max_embed_chars: usize) -> Self {
        let dimensions = known_dimensions(provider.model()).unwrap_or(0);
        Self {
            provider,
            dimensions: AtomicUsize::new(dimensions),
            max_embed_chars,
        }
    }

    /// `"provider/model"` for storage alongside vectors.
    pub fn model_id(&self) -> String {
        format!("{}/{}", self.provider.name(), self.provider.model())
    }

    /// Dimension count, once known.
    pub fn dimensions(&self) -> Option<usize> {
        match self.dimensions.load(Ordering::Relaxed) {
            0 => None,
            d => Some(d),
        }
    }

    fn record_dimensions(&self, vector: &[f32]) {
        if !vector.is_empty() && self.dimensions.load(Ordering::Relaxed) != vector.len() {
            self.dimensions.store(vector.len(), Ordering::Relaxed);
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_at_boundary(text, self.max_embed_chars);
        let vector = self.provider.embed(text).await?;
        self.record_dimensions(&vector);
        Ok(vector)
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_at_boundary(t, self.max_embed_chars).to_string())
            .collect();
        let vectors = self.provider.embed_batch(&truncated).await?;
        if let Some(first) = vectors.first() {
            self.record_dimensions(first);
        }
        Ok(vectors)
    }
}

/// Parse `"provider/model"` and construct the matching dialect client.
fn build_provider(spec: &str) -> Result<Box<dyn EmbeddingProvider>> {
    let (provider, model) = spec
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("embedding model {spec:?} is not \"provider/model\""))?;
    if model.is_empty() {
        anyhow::bail!("embedding model {spec:?} has an empty model name");
    }

    match provider {
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
            let base_url = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            Ok(Box::new(OpenAiEmbeddings::new(api_key, &base_url, model.to_string())))
        }
        "ollama" => {
            let base_url = std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string());
            Ok(Box::new(OllamaEmbeddings::new(&base_url, model.to_string())))
        }
        other => anyhow::bail!("unknown embedding provider {other:?}"),
    }
}

/// Compose the embedding text for an asset: stored content first, else a
/// summary built from metadata fields.
pub fn compose_asset_text(asset: &UnembeddedAsset) -> String {
    if let Some(ref content) = asset.content_prefix {
        if !content.trim().is_empty() {
            return truncate_at_boundary(content, MAX_ASSET_TEXT_CHARS).to_string();
        }
    }

    let mut parts = Vec::new();
    for path in [
        "script.description",
        "script.usage",
        "frontmatter.title",
        "frontmatter.description",
        "content.summary",
    ] {
        if let Some(value) = get_path(&asset.metadata, path).and_then(|v| v.as_str()) {
            if !value.is_empty() {
                parts.push(value.to_string());
            }
        }
    }
    let joined = parts.join("\n");
    truncate_at_boundary(&joined, MAX_ASSET_TEXT_CHARS).to_string()
}

/// Compose the embedding text for an event: the message plus a bounded
/// slice of the shell output preview.
pub fn compose_event_text(event: &UnembeddedEvent) -> String {
    let mut text = event.message.clone();
    if let Some(preview) = get_path(&event.metadata, "shell.output_preview").and_then(|v| v.as_str())
    {
        if !preview.is_empty() {
            text.push('\n');
            text.push_str(truncate_at_boundary(preview, MAX_PREVIEW_CHARS));
        }
    }
    text
}

/// Embed up to `limit` assets lacking vectors. Returns rows written.
pub async fn generate_asset_embeddings(
    pool: &Arc<DatabasePool>,
    client: &EmbeddingClient,
    limit: usize,
) -> Result<usize> {
    let pending = pool
        .interact(move |conn| Ok(db::select_unembedded_assets_sync(conn, limit)?))
        .await?;
    if pending.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = pending.iter().map(compose_asset_text).collect();
    let vectors = client.embed_batch(&texts).await?;

    let rows: Vec<(String, Vec<f32>)> = pending
        .into_iter()
        .zip(vectors)
        .filter(|(_, v)| !v.is_empty())
        .map(|(a, v)| (a.asset_id, v))
        .collect();

    let model = client.model_id();
    let now = now_rfc3339();
    pool.interact(move |conn| Ok(db::upsert_asset_embeddings_sync(conn, &rows, &model, &now)?))
        .await
}

/// Embed up to `limit` events lacking vectors. Returns rows written.
pub async fn generate_event_embeddings(
    pool: &Arc<DatabasePool>,
    client: &EmbeddingClient,
    limit: usize,
) -> Result<usize> {
    let pending = pool
        .interact(move |conn| Ok(db::select_unembedded_events_sync(conn, limit)?))
        .await?;
    if pending.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = pending.iter().map(compose_event_text).collect();
    let vectors = client.embed_batch(&texts).await?;

    let rows: Vec<(String, Vec<f32>)> = pending
        .into_iter()
        .zip(vectors)
        .filter(|(_, v)| !v.is_empty())
        .map(|(e, v)| (e.event_id, v))
        .collect();

    let model = client.model_id();
    let now = now_rfc3339();
    pool.interact(move |conn| Ok(db::upsert_event_embeddings_sync(conn, &rows, &model, &now)?))
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic provider for tests: hashes words onto a small vector.
    pub struct StubProvider {
        pub dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn model(&self) -> &str {
            "stub-model"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; self.dims];
            for word in text.split_whitespace() {
                let mut h = 0usize;
                for b in word.bytes() {
                    h = h.wrapping_mul(31).wrapping_add(b as usize);
                }
                v[h % self.dims] += 1.0;
            }
            Ok(v)
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    pub fn stub_client(dims: usize) -> EmbeddingClient {
        EmbeddingClient::with_provider(Box::new(StubProvider { dims }), 10 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_provider_rejects_bad_specs() {
        assert!(build_provider("no-slash").is_err());
        assert!(build_provider("ollama/").is_err());
        assert!(build_provider("mystery/model").is_err());
    }

    #[test]
    fn test_known_dimensions_table() {
        assert_eq!(known_dimensions("nomic-embed-text"), Some(768));
        assert_eq!(known_dimensions("text-embedding-3-small"), Some(1536));
        assert_eq!(known_dimensions("text-embedding-3-large"), Some(3072));
        assert_eq!(known_dimensions("all-minilm"), Some(384));
        assert_eq!(known_dimensions("made-up-model"), None);
    }

    #[tokio::test]
    async fn test_dimension_discovery_on_first_call() {
        let client = testing::stub_client(16);
        assert_eq!(client.dimensions(), None); // stub-model is not in the table
        client.embed("hello world").await.unwrap();
        assert_eq!(client.dimensions(), Some(16));
    }

    #[test]
    fn test_compose_asset_text_prefers_content() {
        let asset = UnembeddedAsset {
            asset_id: "a".into(),
            content_prefix: Some("echo hello".into()),
            metadata: json!({"script": {"description": "ignored"}}),
        };
        assert_eq!(compose_asset_text(&asset), "echo hello");
    }

    #[test]
    fn test_compose_asset_text_falls_back_to_metadata() {
        let asset = UnembeddedAsset {
            asset_id: "a".into(),
            content_prefix: None,
            metadata: json!({
                "script": {"description": "deploys", "usage": "deploy.sh"},
                "frontmatter": {"title": "Deploy"}
            }),
        };
        assert_eq!(compose_asset_text(&asset), "deploys\ndeploy.sh\nDeploy");
    }

    #[test]
    fn test_compose_event_text_appends_bounded_preview() {
        let event = UnembeddedEvent {
            event_id: "e".into(),
            message: "cargo test".into(),
            metadata: json!({"shell": {"output_preview": "x".repeat(600)}}),
        };
        let text = compose_event_text(&event);
        assert!(text.starts_with("cargo test\n"));
        assert_eq!(text.len(), "cargo test\n".len() + 500);
    }

    #[tokio::test]
    async fn test_generate_event_embeddings_pass() {
        let pool = Arc::new(crate::db::DatabasePool::open_in_memory().await.unwrap());
        pool.interact(|conn| {
            for i in 0..3 {
                conn.execute(
                    "INSERT INTO events (id, timestamp, message, metadata) VALUES (?, ?, ?, '{}')",
                    rusqlite::params![format!("e{i}"), format!("2024-01-0{}T00:00:00Z", i + 1), "msg"],
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();

        let client = testing::stub_client(8);
        assert_eq!(generate_event_embeddings(&pool, &client, 100).await.unwrap(), 3);
        // second pass finds nothing left
        assert_eq!(generate_event_embeddings(&pool, &client, 100).await.unwrap(), 0);
    }
}
