use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::settings::EmbeddingConfig;
use crate::utils::error::ApiError;

/// `Embedding.Embed` (§4.1 C1): batched dense embedding, fixed dimension
/// d=1024, returned in the order given.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
    fn dimension(&self) -> usize;
}

pub struct EmbeddingAdapter {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingAdapter {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl Embedder for EmbeddingAdapter {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            debug!(batch_len = batch.len(), "embedding batch request");

            let request = EmbeddingRequest {
                model: &self.config.model,
                input: batch,
            };

            let response = self
                .client
                .post(format!("{}/embeddings", self.config.base_url))
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        ApiError::Timeout("embedding request timed out".to_string())
                    } else {
                        ApiError::Upstream(format!("embedding request failed: {e}"))
                    }
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::Upstream(format!(
                    "embedding API returned {status}: {body}"
                )));
            }

            let mut parsed: EmbeddingResponse = response.json().await?;

            if parsed.data.len() != batch.len() {
                return Err(ApiError::Upstream(format!(
                    "embedding count mismatch: requested {}, got {}",
                    batch.len(),
                    parsed.data.len()
                )));
            }

            parsed.data.sort_by_key(|d| d.index);
            for datum in parsed.data {
                if datum.embedding.len() != self.config.dimension {
                    return Err(ApiError::Upstream(format!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.config.dimension,
                        datum.embedding.len()
                    )));
                }
                all_vectors.push(datum.embedding);
            }
        }

        Ok(all_vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
