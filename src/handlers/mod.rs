pub mod contracts;
pub mod elasticsearch;
pub mod health;
pub mod maintenance;
pub mod qa;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Assembles the full `/api/v1/...` surface (§6): contracts, their
/// Elasticsearch admin sub-resource, QA sessions, maintenance, and
/// health/info. Nested under `/api/v1` by the caller.
pub fn routes() -> Router<AppState> {
    let upload_route = Router::new()
        .route("/upload", post(contracts::upload))
        .layer(DefaultBodyLimit::max(200 * 1024 * 1024));

    let contract_routes = Router::new()
        .merge(upload_route)
        .route("/", get(contracts::list))
        .route("/{id}", get(contracts::get).delete(contracts::delete))
        .route("/{id}/download", get(contracts::download))
        .route("/{id}/ocr-status", get(contracts::ocr_status))
        .route("/{id}/content-status", get(contracts::content_status))
        .route("/{id}/automated-status", get(contracts::automated_status))
        .route("/{id}/process-ocr", post(contracts::process_ocr))
        .route("/{id}/process-content", post(contracts::process_content))
        .route("/{id}/process-automated", post(contracts::process_automated))
        .route("/{id}/html-content", get(contracts::html_content))
        .route("/{id}/content/chunks", get(contracts::chunks))
        .route("/{id}/content/search", get(contracts::content_search))
        .route("/{id}/fields", get(contracts::fields))
        .route("/elasticsearch/status", get(elasticsearch::status))
        .route("/elasticsearch/init", post(elasticsearch::init))
        .route("/elasticsearch/search", get(elasticsearch::search))
        .route("/elasticsearch/sync-all", post(elasticsearch::sync_all))
        .route("/elasticsearch/sync-status", get(elasticsearch::sync_status))
        .route("/elasticsearch/{id}/sync", post(elasticsearch::sync));

    let qa_routes = Router::new()
        .route("/ask", post(qa::ask))
        .route("/sessions", get(qa::list_sessions))
        .route("/sessions/{session_id}", get(qa::get_session).delete(qa::delete_session))
        .route(
            "/sessions/{session_id}/messages/{id}/feedback",
            post(qa::set_feedback),
        )
        .route("/search-logs", get(qa::search_logs));

    let maintenance_routes =
        Router::new().route("/clear-all", post(maintenance::clear_all));

    Router::new()
        .nest("/contracts", contract_routes)
        .nest("/qa", qa_routes)
        .nest("/maintenance", maintenance_routes)
        .route("/health", get(health::health_check))
        .route("/info", get(health::info))
}
