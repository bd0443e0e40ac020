use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::settings::ElasticsearchConfig;
use crate::utils::error::ApiError;

pub const CONTRACTS_INDEX: &str = "contracts";
pub const CONTENTS_INDEX: &str = "contract_contents";

/// Document-level record indexed into `contracts` (§4.6 C6).
#[derive(Debug, Clone, Serialize)]
pub struct ContractDocument {
    pub contract_id: i64,
    pub contract_number: String,
    pub contract_name: String,
    pub contract_type: Option<String>,
    pub keywords: Vec<String>,
    pub summary: String,
    pub file_name: String,
    pub upload_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Chunk-level record indexed into `contract_contents` (§4.6 C6).
#[derive(Debug, Clone, Serialize)]
pub struct ContentDocument {
    pub chunk_id: i64,
    pub contract_id: i64,
    pub contract_number: String,
    pub contract_name: String,
    pub file_name: String,
    pub file_format: String,
    pub upload_time: DateTime<Utc>,
    pub contract_type: Option<String>,
    pub chunk_index: i32,
    pub content_text: String,
    pub chunk_type: String,
    pub chunk_size: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentHit {
    pub chunk_id: i64,
    pub contract_id: i64,
    pub chunk_index: i32,
    pub contract_name: Option<String>,
    pub contract_number: Option<String>,
    pub content_text: String,
    pub score: f32,
    pub highlights: Vec<String>,
}

/// Raw `reqwest` calls against the Elasticsearch REST API (§4.6); no
/// `elasticsearch` SDK crate dependency, matching the teacher's pattern of
/// hand-rolled HTTP clients for every remote dependency.
pub struct LexicalIndex {
    client: Client,
    base_url: String,
    enabled: bool,
}

impl LexicalIndex {
    pub fn new(config: &ElasticsearchConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url(),
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Idempotently creates both indices with the mappings of §4.6.
    pub async fn ensure_indices(&self) -> Result<(), ApiError> {
        if !self.enabled {
            return Ok(());
        }

        self.ensure_index(CONTRACTS_INDEX, contracts_mapping()).await?;
        self.ensure_index(CONTENTS_INDEX, contents_mapping()).await?;
        Ok(())
    }

    async fn ensure_index(&self, index: &str, mapping: Value) -> Result<(), ApiError> {
        let exists = self
            .client
            .head(format!("{}/{}", self.base_url, index))
            .send()
            .await?;

        if exists.status() == StatusCode::OK {
            debug!(index, "lexical index already present");
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/{}", self.base_url, index))
            .json(&mapping)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "failed to create index {index}: {status} {body}"
            )));
        }

        Ok(())
    }

    /// Upserts at id `"contract_{id}"` (§4.6 `IndexContract`).
    pub async fn index_contract(&self, doc: &ContractDocument) -> Result<(), ApiError> {
        if !self.enabled {
            return Ok(());
        }
        self.upsert(
            CONTRACTS_INDEX,
            &format!("contract_{}", doc.contract_id),
            serde_json::to_value(doc)?,
        )
        .await
    }

    /// Upserts at id `"chunk_{id}"` (§4.6 `IndexChunk`).
    pub async fn index_chunk(&self, doc: &ContentDocument) -> Result<(), ApiError> {
        if !self.enabled {
            return Ok(());
        }
        self.upsert(
            CONTENTS_INDEX,
            &format!("chunk_{}", doc.chunk_id),
            serde_json::to_value(doc)?,
        )
        .await
    }

    async fn upsert(&self, index: &str, id: &str, body: Value) -> Result<(), ApiError> {
        let response = self
            .client
            .put(format!("{}/{}/_doc/{}", self.base_url, index, id))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "failed to upsert {index}/{id}: {status} {text}"
            )));
        }

        Ok(())
    }

    /// `multi_match` over `(content_text^2, contract_name, contract_number)`,
    /// fuzziness AUTO, highlighted `content_text` at fragment size 150,
    /// sorted `_score desc, chunk_index asc`, optionally filtered by
    /// `contract_id` (§4.6 `SearchContents`). Returns an empty result
    /// (never an error) when Elasticsearch is disabled or unreachable —
    /// the query pipeline tolerates this as a partial failure (§7).
    pub async fn search_contents(
        &self,
        query: &str,
        contract_ids: Option<&[i64]>,
        limit: usize,
    ) -> Vec<ContentHit> {
        if !self.enabled {
            return Vec::new();
        }

        let mut bool_query = json!({
            "must": [
                {
                    "multi_match": {
                        "query": query,
                        "fields": ["content_text^2", "contract_name", "contract_number"],
                        "type": "best_fields",
                        "fuzziness": "AUTO"
                    }
                }
            ]
        });

        if let Some(ids) = contract_ids {
            bool_query["filter"] = json!([{ "terms": { "contract_id": ids } }]);
        }

        let body = json!({
            "query": { "bool": bool_query },
            "highlight": {
                "fields": {
                    "content_text": { "fragment_size": 150, "number_of_fragments": 3 }
                }
            },
            "sort": [
                { "_score": { "order": "desc" } },
                { "chunk_index": { "order": "asc" } }
            ],
            "size": limit
        });

        match self.raw_search(CONTENTS_INDEX, body).await {
            Ok(response) => parse_content_hits(&response),
            Err(err) => {
                warn!(error = %err, "lexical search failed, continuing without keyword results");
                Vec::new()
            }
        }
    }

    async fn raw_search(&self, index: &str, body: Value) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(format!("{}/{}/_search", self.base_url, index))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "search against {index} failed: {status} {text}"
            )));
        }

        Ok(response.json().await?)
    }

    /// Deletes the contract document and every chunk document for that
    /// contract (§4.6 `DeleteContract`).
    pub async fn delete_contract(&self, contract_id: i64) -> Result<(), ApiError> {
        if !self.enabled {
            return Ok(());
        }

        let _ = self
            .client
            .delete(format!(
                "{}/{}/_doc/contract_{}",
                self.base_url, CONTRACTS_INDEX, contract_id
            ))
            .send()
            .await?;

        let delete_by_query = json!({
            "query": { "term": { "contract_id": contract_id } }
        });
        let _ = self
            .client
            .post(format!(
                "{}/{}/_delete_by_query",
                self.base_url, CONTENTS_INDEX
            ))
            .json(&delete_by_query)
            .send()
            .await?;

        Ok(())
    }

    /// Reachability and cluster name (§4.6 `Health`).
    pub async fn health(&self) -> (bool, Option<String>) {
        if !self.enabled {
            return (false, None);
        }

        match self.client.get(&self.base_url).send().await {
            Ok(response) if response.status().is_success() => {
                let body: Value = response.json().await.unwrap_or_default();
                let cluster_name = body
                    .get("cluster_name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                (true, cluster_name)
            }
            _ => (false, None),
        }
    }
}

fn parse_content_hits(response: &Value) -> Vec<ContentHit> {
    response["hits"]["hits"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|hit| {
            let source = hit.get("_source")?;
            let highlights = hit["highlight"]["content_text"]
                .as_array()
                .map(|frags| {
                    frags
                        .iter()
                        .filter_map(|f| f.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();

            Some(ContentHit {
                chunk_id: source.get("chunk_id")?.as_i64()?,
                contract_id: source.get("contract_id")?.as_i64()?,
                chunk_index: source.get("chunk_index").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
                contract_name: source
                    .get("contract_name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                contract_number: source
                    .get("contract_number")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                content_text: source
                    .get("content_text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: hit.get("_score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
                highlights,
            })
        })
        .collect()
}

fn contracts_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "contract_id": { "type": "long" },
                "contract_number": { "type": "keyword" },
                "contract_name": { "type": "text" },
                "contract_type": { "type": "keyword" },
                "keywords": { "type": "text" },
                "summary": { "type": "text" },
                "file_name": { "type": "keyword" },
                "upload_time": { "type": "date" },
                "created_at": { "type": "date" }
            }
        }
    })
}

fn contents_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "chunk_id": { "type": "long" },
                "contract_id": { "type": "long" },
                "contract_number": { "type": "keyword" },
                "contract_name": { "type": "keyword" },
                "file_name": { "type": "keyword" },
                "file_format": { "type": "keyword" },
                "upload_time": { "type": "date" },
                "contract_type": { "type": "keyword" },
                "chunk_index": { "type": "integer" },
                "content_text": { "type": "text" },
                "chunk_type": { "type": "keyword" },
                "chunk_size": { "type": "integer" },
                "created_at": { "type": "date" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hits_from_es_response_shape() {
        let response = json!({
            "hits": {
                "hits": [
                    {
                        "_score": 3.2,
                        "_source": {
                            "chunk_id": 10,
                            "contract_id": 1,
                            "chunk_index": 0,
                            "contract_name": "示例合同",
                            "contract_number": "C001",
                            "content_text": "这是内容"
                        },
                        "highlight": { "content_text": ["<em>这是</em>内容"] }
                    }
                ]
            }
        });

        let hits = parse_content_hits(&response);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 10);
        assert_eq!(hits[0].highlights.len(), 1);
    }

    #[test]
    fn disabled_client_skips_network_calls() {
        let config = ElasticsearchConfig {
            enabled: false,
            host: "localhost".to_string(),
            port: 9200,
            scheme: "http".to_string(),
        };
        let index = LexicalIndex::new(&config);
        assert!(!index.is_enabled());
    }
}
