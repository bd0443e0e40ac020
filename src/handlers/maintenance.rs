use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::response::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct ClearAllQuery {
    #[serde(default)]
    pub reset_indices: bool,
}

/// `POST /api/v1/maintenance/clear-all?reset_indices=` (§6): wipes every
/// contract row (cascading to chunks, which cascades further via the
/// migration's foreign keys) and the in-process vector mapping. With
/// `reset_indices=true`, also drops and recreates the Elasticsearch
/// indices — a dev-only reset, not a production data-retention tool.
pub async fn clear_all(
    State(state): State<AppState>,
    Query(query): Query<ClearAllQuery>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let contracts = state.repository.list_all_contracts().await?;
    for contract in &contracts {
        let _ = state.lexical.delete_contract(contract.id).await;
        let _ = state.repository.delete_contract(contract.id).await;
    }

    state
        .vector_index
        .clear_mapping()
        .map_err(|e| ApiError::Internal(format!("failed to clear vector mapping: {e}")))?;

    if query.reset_indices {
        if let Err(e) = state.lexical.ensure_indices().await {
            warn!(error = %e, "failed to recreate lexical indices during clear-all");
        }
    }

    info!(contract_count = contracts.len(), reset_indices = query.reset_indices, "cleared all contract state");

    Ok(ApiResponse::ok_with_message(
        "已清空全部合同与索引状态",
        json!({ "contracts_removed": contracts.len(), "reset_indices": query.reset_indices }),
    ))
}
