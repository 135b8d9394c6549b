// crates/apprentice-server/src/embeddings/openai.rs
// OpenAI-compatible /embeddings dialect: array input, results sorted by index

use super::EmbeddingProvider;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Max texts per batch request.
const MAX_BATCH_SIZE: usize = 100;

/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;

/// Retry attempts after the first try
const RETRY_ATTEMPTS: usize = 2;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Client for any OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbeddings {
    api_key: String,
    endpoint: String,
    model: String,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, base_url: &str, model: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            http_client,
        }
    }

    /// One POST with an array input; results are re-ordered by `index`.
    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            let response = match self
                .http_client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(e.into());
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                last_error = Some(anyhow::anyhow!("embeddings API error {status}: {text}"));
                continue;
            }

            let parsed: EmbeddingResponse =
                response.json().await.context("invalid embeddings response body")?;
            let mut indexed: Vec<(usize, Vec<f32>)> = parsed
                .data
                .into_iter()
                .map(|d| (d.index, d.embedding))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            let embeddings: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();
            if embeddings.len() != texts.len() {
                anyhow::bail!(
                    "embeddings response returned {} vectors for {} inputs",
                    embeddings.len(),
                    texts.len()
                );
            }
            return Ok(embeddings);
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("embeddings request failed")))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let results = self.request_batch(&texts).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embeddings response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let chunks: Vec<&[String]> = texts.chunks(MAX_BATCH_SIZE).collect();
        if chunks.len() > 1 {
            debug!("Embedding {} texts in {} batches", texts.len(), chunks.len());
        }

        let futures: Vec<_> = chunks.iter().map(|chunk| self.request_batch(chunk)).collect();
        let results = futures::future::join_all(futures).await;

        let mut all = Vec::with_capacity(texts.len());
        for result in results {
            all.extend(result?);
        }
        Ok(all)
    }
}
