use axum::extract::{Path as AxumPath, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::database::models::{QaSession, QaSessionTurn, SearchLog};
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::response::ApiResponse;

fn normalize_pagination(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    (page.unwrap_or(1).max(1), page_size.unwrap_or(20).clamp(1, 100))
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T: Serialize> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub id: i64,
    pub session_id: String,
    pub message_order: i32,
    pub question: String,
    pub answer: String,
    pub source_contracts: serde_json::Value,
    pub source_chunks: serde_json::Value,
    pub search_method: Option<String>,
    pub response_time_ms: i64,
    pub user_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<QaSessionTurn> for TurnResponse {
    fn from(t: QaSessionTurn) -> Self {
        Self {
            id: t.id,
            session_id: t.session_id,
            message_order: t.message_order,
            question: t.question,
            answer: t.answer,
            source_contracts: t.source_contracts,
            source_chunks: t.source_chunks,
            search_method: t.search_method,
            response_time_ms: t.response_time_ms,
            user_feedback: t.user_feedback,
            created_at: t.created_at,
        }
    }
}

/// `POST /api/v1/qa/ask` (§6): runs the full C9 hybrid pipeline and logs
/// the execution to `search_logs` (SPEC_FULL §3.1) independently of
/// whether the turn itself persisted.
pub async fn ask(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<AskRequest>,
) -> Result<ApiResponse<TurnResponse>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::Validation("question must not be empty".to_string()));
    }

    let start = Instant::now();
    let result = state.rag_service.ask(&request.question, request.session_id.clone()).await;
    let elapsed_ms = start.elapsed().as_millis() as i64;

    match result {
        Ok(turn) => {
            let result_count = turn.source_chunks.as_array().map(|a| a.len()).unwrap_or(0) as i32;
            let _ = state
                .repository
                .insert_search_log(
                    Some(&turn.session_id),
                    &request.question,
                    turn.search_method.as_deref(),
                    result_count,
                    elapsed_ms,
                )
                .await;
            Ok(ApiResponse::ok(TurnResponse::from(turn)))
        }
        Err(e) => {
            let _ = state
                .repository
                .insert_search_log(request.session_id.as_deref(), &request.question, None, 0, elapsed_ms)
                .await;
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub session_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl From<QaSession> for SessionResponse {
    fn from(s: QaSession) -> Self {
        Self {
            session_id: s.session_id,
            session_title: s.session_title,
            created_at: s.created_at,
            last_active_at: s.last_active_at,
        }
    }
}

/// `GET /api/v1/qa/sessions?page=&page_size=` (§6): sorted by
/// `last_active_at desc`, a proxy for "most recent turn" since titling
/// lives on the session header row rather than per-turn (Open Question
/// resolution, see DESIGN.md).
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<ApiResponse<PaginatedResponse<SessionResponse>>, ApiError> {
    let (page, page_size) = normalize_pagination(query.page, query.page_size);
    let (sessions, total) = state.repository.list_sessions(page, page_size).await?;

    Ok(ApiResponse::ok(PaginatedResponse {
        items: sessions.into_iter().map(SessionResponse::from).collect(),
        page,
        page_size,
        total,
    }))
}

/// `GET /api/v1/qa/sessions/{session_id}` (§6): every turn, in order.
pub async fn get_session(
    State(state): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
) -> Result<ApiResponse<Vec<TurnResponse>>, ApiError> {
    let turns = state.repository.get_session_turns(&session_id).await?;
    if turns.is_empty() {
        return Err(ApiError::NotFound(format!("session {session_id} not found")));
    }
    Ok(ApiResponse::ok(turns.into_iter().map(TurnResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: String,
}

/// `POST /api/v1/qa/sessions/{session_id}/messages/{id}/feedback` (§6):
/// `feedback` must be `helpful` or `not_helpful`.
pub async fn set_feedback(
    State(state): State<AppState>,
    AxumPath((session_id, turn_id)): AxumPath<(String, i64)>,
    axum::Json(request): axum::Json<FeedbackRequest>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    if request.feedback != "helpful" && request.feedback != "not_helpful" {
        return Err(ApiError::Validation(
            "feedback must be \"helpful\" or \"not_helpful\"".to_string(),
        ));
    }

    let updated = state
        .repository
        .set_turn_feedback(&session_id, turn_id, &request.feedback)
        .await?;

    if !updated {
        return Err(ApiError::NotFound(format!(
            "message {turn_id} not found in session {session_id}"
        )));
    }

    Ok(ApiResponse::ok_with_message(
        "反馈已记录",
        serde_json::json!({ "session_id": session_id, "message_id": turn_id }),
    ))
}

/// `DELETE /api/v1/qa/sessions/{session_id}` (§6).
pub async fn delete_session(
    State(state): State<AppState>,
    AxumPath(session_id): AxumPath<String>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let deleted = state.repository.delete_session(&session_id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("session {session_id} not found")));
    }
    Ok(ApiResponse::ok_with_message(
        "会话已删除",
        serde_json::json!({ "session_id": session_id }),
    ))
}

#[derive(Debug, Serialize)]
pub struct SearchLogResponse {
    pub id: i64,
    pub session_id: Option<String>,
    pub question: String,
    pub search_method: Option<String>,
    pub result_count: i32,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl From<SearchLog> for SearchLogResponse {
    fn from(l: SearchLog) -> Self {
        Self {
            id: l.id,
            session_id: l.session_id,
            question: l.question,
            search_method: l.search_method,
            result_count: l.result_count,
            response_time_ms: l.response_time_ms,
            created_at: l.created_at,
        }
    }
}

/// `GET /api/v1/qa/search-logs?page=&page_size=` (SPEC_FULL §6.1,
/// supplemented): analytics-only, independent of whether a turn
/// ultimately persisted.
pub async fn search_logs(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<ApiResponse<PaginatedResponse<SearchLogResponse>>, ApiError> {
    let (page, page_size) = normalize_pagination(query.page, query.page_size);
    let (logs, total) = state.repository.list_search_logs(page, page_size).await?;

    Ok(ApiResponse::ok(PaginatedResponse {
        items: logs.into_iter().map(SearchLogResponse::from).collect(),
        page,
        page_size,
        total,
    }))
}
