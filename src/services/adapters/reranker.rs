use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::settings::RerankerConfig;
use crate::utils::error::ApiError;

/// One reranked document: its original index into the candidate list and
/// a monotone-decreasing relevance score (§4.1 C1 `Reranker.Rank`).
#[derive(Debug, Clone)]
pub struct RankedDoc {
    pub orig_index: usize,
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rank(
        &self,
        query: &str,
        docs: &[String],
        top_k: Option<usize>,
    ) -> Result<Vec<RankedDoc>, ApiError>;
}

pub struct RerankerAdapter {
    client: Client,
    config: RerankerConfig,
}

impl RerankerAdapter {
    pub fn new(config: RerankerConfig) -> Self {
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
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[async_trait]
impl Reranker for RerankerAdapter {
    async fn rank(
        &self,
        query: &str,
        docs: &[String],
        top_k: Option<usize>,
    ) -> Result<Vec<RankedDoc>, ApiError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        debug!(doc_count = docs.len(), "reranker request");

        let request = RerankRequest {
            model: &self.config.model,
            query,
            documents: docs,
            top_n: top_k,
        };

        let response = self
            .client
            .post(format!("{}/rerank", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout("reranker request timed out".to_string())
                } else {
                    ApiError::Upstream(format!("reranker request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "reranker returned {status}: {body}"
            )));
        }

        let parsed: RerankResponse = response.json().await?;
        let mut ranked: Vec<RankedDoc> = parsed
            .results
            .into_iter()
            .map(|r| RankedDoc {
                orig_index: r.index,
                score: r.relevance_score,
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ranked)
    }
}
