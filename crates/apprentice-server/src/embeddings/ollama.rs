// crates/apprentice-server/src/embeddings/ollama.rs
// Ollama single-prompt dialect: one text per request, sequential with a
// small inter-call delay so a local model is not flooded

use super::EmbeddingProvider;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Local models are slow to warm up.
const TIMEOUT_SECS: u64 = 60;

/// Pause between sequential prompt calls.
const INTER_CALL_DELAY_MS: u64 = 50;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Client for Ollama's native /api/embeddings endpoint (no auth).
pub struct OllamaEmbeddings {
    endpoint: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaEmbeddings {
    pub fn new(base_url: &str, model: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            model,
            http_client,
        }
    }

    async fn request_one(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("ollama embeddings request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("ollama embeddings error {status}: {text}");
        }

        let parsed: EmbeddingResponse =
            response.json().await.context("invalid ollama embeddings body")?;
        if parsed.embedding.is_empty() {
            anyhow::bail!("ollama returned an empty embedding");
        }
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request_one(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(INTER_CALL_DELAY_MS)).await;
            }
            results.push(self.request_one(text).await?);
        }
        Ok(results)
    }
}
