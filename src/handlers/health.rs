use axum::extract::State;
use serde::Serialize;
use serde_json::json;

use crate::state::AppState;
use crate::utils::response::ApiResponse;

#[derive(Debug, Serialize)]
pub struct LexicalHealth {
    pub enabled: bool,
    pub reachable: bool,
    pub cluster_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VectorHealth {
    pub vector_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: bool,
    pub lexical_index: LexicalHealth,
    pub vector_index: VectorHealth,
}

/// `GET /api/v1/health` (§6): checks every backing store independently —
/// a lexical or vector problem is reported alongside a healthy database
/// rather than masked by it (§7, no stage aborts the others).
pub async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthStatus> {
    let database = sqlx::query("SELECT 1")
        .execute(state.repository.pool().get_pool())
        .await
        .is_ok();

    let (lexical_reachable, cluster_name) = state.lexical.health().await;

    let status = HealthStatus {
        status: if database {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        database,
        lexical_index: LexicalHealth {
            enabled: state.lexical.is_enabled(),
            reachable: lexical_reachable,
            cluster_name,
        },
        vector_index: VectorHealth {
            vector_count: state.vector_index.len(),
        },
    };

    ApiResponse::ok(status)
}

/// `GET /api/v1/info` (§6): static build and configuration info, no I/O.
pub async fn info(State(state): State<AppState>) -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "max_upload_size_bytes": state.settings.upload.max_file_size_bytes,
        "supported_formats": state.settings.upload.supported_formats,
        "vector_dimension": state.settings.vector.dimension,
    }))
}
