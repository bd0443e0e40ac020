use axum::extract::{Path as AxumPath, Query, State};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::database::models::{STATUS_COMPLETED, STATUS_FAILED, STATUS_PENDING, STATUS_PROCESSING};
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::response::ApiResponse;

#[derive(Debug, Serialize)]
pub struct LexicalStatusResponse {
    pub enabled: bool,
    pub reachable: bool,
    pub cluster_name: Option<String>,
}

/// `GET /api/v1/contracts/elasticsearch/status` (§6).
pub async fn status(State(state): State<AppState>) -> ApiResponse<LexicalStatusResponse> {
    let (reachable, cluster_name) = state.lexical.health().await;
    ApiResponse::ok(LexicalStatusResponse {
        enabled: state.lexical.is_enabled(),
        reachable,
        cluster_name,
    })
}

/// `POST /api/v1/contracts/elasticsearch/init` (§6): idempotent
/// create-if-missing for both indices (§4.6 `EnsureIndices`).
pub async fn init(State(state): State<AppState>) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    state.lexical.ensure_indices().await?;
    Ok(ApiResponse::ok_with_message(
        "索引已就绪",
        serde_json::json!({ "contracts_index": true, "contents_index": true }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchHitResponse {
    pub chunk_id: i64,
    pub contract_id: i64,
    pub chunk_index: i32,
    pub content_text: String,
    pub score: f32,
    pub highlights: Vec<String>,
}

/// `GET /api/v1/contracts/elasticsearch/search?q=&size=` (§6): unscoped
/// lexical search across every contract's content.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResponse<Vec<SearchHitResponse>> {
    let limit = query.size.unwrap_or(20).clamp(1, 100);
    let hits = state.lexical.search_contents(&query.q, None, limit).await;

    ApiResponse::ok(
        hits.into_iter()
            .map(|h| SearchHitResponse {
                chunk_id: h.chunk_id,
                contract_id: h.contract_id,
                chunk_index: h.chunk_index,
                content_text: h.content_text,
                score: h.score,
                highlights: h.highlights,
            })
            .collect(),
    )
}

/// `POST /api/v1/contracts/elasticsearch/{id}/sync` (§6): (re)indexes one
/// contract's document and chunk records in the background.
pub async fn sync(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    state
        .repository
        .get_contract(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {id} not found")))?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_ft_sync_only(id).await {
            error!(contract_id = id, error = %e, "lexical sync failed");
        }
    });

    Ok(ApiResponse::ok_with_message(
        "同步已启动",
        serde_json::json!({ "contract_id": id }),
    ))
}

/// `POST /api/v1/contracts/elasticsearch/sync-all` (§6): syncs every
/// contract whose content is ready but not yet synced, sequentially, in
/// the background (§9 Non-goals: "no offline batch reprocessing beyond a
/// simple sync-all loop").
pub async fn sync_all(
    State(state): State<AppState>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let contracts = state.repository.list_all_contracts().await?;
    let pending: Vec<i64> = contracts
        .into_iter()
        .filter(|c| c.content_status == STATUS_COMPLETED && c.elasticsearch_sync_status != STATUS_COMPLETED)
        .map(|c| c.id)
        .collect();

    let count = pending.len();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        for contract_id in pending {
            if let Err(e) = orchestrator.run_ft_sync_only(contract_id).await {
                error!(contract_id, error = %e, "sync-all: lexical sync failed");
            }
        }
        info!("sync-all finished");
    });

    Ok(ApiResponse::ok_with_message(
        "批量同步已启动",
        serde_json::json!({ "contracts_queued": count }),
    ))
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

/// `GET /api/v1/contracts/elasticsearch/sync-status` (§6): a count of
/// contracts in each `elasticsearch_sync_status` bucket.
pub async fn sync_status(
    State(state): State<AppState>,
) -> Result<ApiResponse<SyncStatusResponse>, ApiError> {
    let contracts = state.repository.list_all_contracts().await?;

    let mut response = SyncStatusResponse {
        pending: 0,
        processing: 0,
        completed: 0,
        failed: 0,
    };

    for contract in &contracts {
        match contract.elasticsearch_sync_status.as_str() {
            STATUS_PENDING => response.pending += 1,
            STATUS_PROCESSING => response.processing += 1,
            STATUS_COMPLETED => response.completed += 1,
            STATUS_FAILED => response.failed += 1,
            _ => {}
        }
    }

    Ok(ApiResponse::ok(response))
}
