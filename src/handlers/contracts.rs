use std::path::Path;

use axum::{
    body::Body,
    extract::{Multipart, Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::database::models::Contract;
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::response::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

fn normalize_pagination(query: &PaginationQuery) -> (i64, i64) {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20).clamp(1, 100);
    (page, page_size)
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T: Serialize> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct ContractResponse {
    pub id: i64,
    pub contract_number: String,
    pub contract_name: String,
    pub contract_type: Option<String>,
    pub original_filename: String,
    pub file_size: i64,
    pub file_format: String,
    pub upload_time: DateTime<Utc>,
    pub ocr_status: String,
    pub content_status: String,
    pub vector_status: String,
    pub elasticsearch_sync_status: String,
    pub created_at: DateTime<Utc>,
}

impl From<Contract> for ContractResponse {
    fn from(c: Contract) -> Self {
        Self {
            id: c.id,
            contract_number: c.contract_number,
            contract_name: c.contract_name,
            contract_type: c.contract_type,
            original_filename: c.original_filename,
            file_size: c.file_size,
            file_format: c.file_format,
            upload_time: c.upload_time,
            ocr_status: c.ocr_status,
            content_status: c.content_status,
            vector_status: c.vector_status,
            elasticsearch_sync_status: c.elasticsearch_sync_status,
            created_at: c.created_at,
        }
    }
}

async fn load_contract(state: &AppState, id: i64) -> Result<Contract, ApiError> {
    state
        .repository
        .get_contract(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("contract {id} not found")))
}

fn percent_encode_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len() * 3);
    for byte in name.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char);
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub contract_type: Option<String>,
}

/// `POST /api/v1/contracts/upload` (§6): derives `(contract_number,
/// contract_name)` from the filename stem by splitting on the first `-`
/// (§6 "Filename contract parsing"); rejects a duplicate contract number
/// with 400 and an oversized body with 413 before any row is written.
/// Dispatches the full pipeline as a detached background task and
/// returns as soon as the upload itself is durable (§4.8).
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            original_filename = field.file_name().map(|s| s.to_string());
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read uploaded file: {e}")))?
                    .to_vec(),
            );
        }
    }

    let file_bytes =
        file_bytes.ok_or_else(|| ApiError::Validation("multipart field \"file\" is required".to_string()))?;
    let original_filename = original_filename
        .ok_or_else(|| ApiError::Validation("uploaded file has no filename".to_string()))?;

    if file_bytes.len() as u64 > state.settings.upload.max_file_size_bytes {
        return Ok((
            StatusCode::PAYLOAD_TOO_LARGE,
            axum::Json(serde_json::json!({
                "success": false,
                "message": format!(
                    "file exceeds the maximum allowed size of {} bytes",
                    state.settings.upload.max_file_size_bytes
                ),
            })),
        )
            .into_response());
    }

    let path = Path::new(&original_filename);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();

    if !state
        .settings
        .upload
        .supported_formats
        .iter()
        .any(|f| f.eq_ignore_ascii_case(&extension))
    {
        return Err(ApiError::Validation(format!("unsupported file format: {extension}")));
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
    let (contract_number, contract_name) = match stem.split_once('-') {
        Some((number, name)) if !number.is_empty() && !name.is_empty() => {
            (number.to_string(), name.to_string())
        }
        _ => (stem.to_string(), stem.to_string()),
    };

    if state
        .repository
        .find_contract_by_number(&contract_number)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!("合同编号 {contract_number} 已存在")));
    }

    let now = Utc::now();
    let rel_dir = Path::new(&state.settings.upload.upload_dir)
        .join(now.format("%Y").to_string())
        .join(now.format("%m").to_string())
        .join(now.format("%d").to_string());
    std::fs::create_dir_all(&rel_dir)?;

    let stored_name = format!("{}{}", Uuid::new_v4(), extension);
    let stored_path = rel_dir.join(&stored_name);
    std::fs::write(&stored_path, &file_bytes)?;

    let file_format = extension.trim_start_matches('.').to_uppercase();

    let contract = match state
        .repository
        .create_contract(
            &contract_number,
            &contract_name,
            query.contract_type.as_deref(),
            &original_filename,
            &stored_path.to_string_lossy(),
            file_bytes.len() as i64,
            &file_format,
        )
        .await
    {
        Ok(c) => c,
        Err(e) => {
            let _ = std::fs::remove_file(&stored_path);
            return Err(e.into());
        }
    };

    info!(contract_id = contract.id, contract_number = %contract.contract_number, "contract uploaded");

    let orchestrator = state.orchestrator.clone();
    let contract_id = contract.id;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.process_contract(contract_id, false).await {
            error!(contract_id, error = %e, "pipeline failed for uploaded contract");
        }
    });

    Ok(
        ApiResponse::ok_with_message("合同上传成功，正在处理中", ContractResponse::from(contract))
            .into_response(),
    )
}

/// `GET /api/v1/contracts/?page=&page_size=` (§6).
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<ApiResponse<PaginatedResponse<ContractResponse>>, ApiError> {
    let (page, page_size) = normalize_pagination(&query);
    let (contracts, total) = state.repository.list_contracts(page, page_size).await?;

    Ok(ApiResponse::ok(PaginatedResponse {
        items: contracts.into_iter().map(ContractResponse::from).collect(),
        page,
        page_size,
        total,
    }))
}

/// `GET /api/v1/contracts/{id}` (§6).
pub async fn get(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<ContractResponse>, ApiError> {
    let contract = load_contract(&state, id).await?;
    Ok(ApiResponse::ok(ContractResponse::from(contract)))
}

/// `GET /api/v1/contracts/{id}/download` (§6): streams the original
/// uploaded bytes back with the original filename, percent-encoded for
/// non-ASCII contract names.
pub async fn download(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Response, ApiError> {
    let contract = load_contract(&state, id).await?;

    let bytes = tokio::fs::read(&contract.stored_path)
        .await
        .map_err(|_| ApiError::NotFound("stored file is missing on disk".to_string()))?;

    let encoded_name = percent_encode_filename(&contract.original_filename);
    let content_disposition = format!("attachment; filename*=UTF-8''{encoded_name}");

    Ok((
        [
            (header::CONTENT_DISPOSITION, content_disposition),
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        ],
        Body::from(bytes),
    )
        .into_response())
}

/// `DELETE /api/v1/contracts/{id}` (§6): cascading delete across the
/// database, the lexical index, the vector mapping, and the files on
/// disk (uploaded original, derived HTML, derived plain text).
pub async fn delete(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let contract = load_contract(&state, id).await?;

    let deleted = state.orchestrator.delete_contract(id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("contract {id} not found")));
    }

    let _ = std::fs::remove_file(&contract.stored_path);
    if let Some(path) = &contract.html_content_path {
        let _ = std::fs::remove_file(path);
    }
    if let Some(path) = &contract.text_content_path {
        let _ = std::fs::remove_file(path);
    }

    Ok(ApiResponse::ok_with_message(
        "合同已删除",
        serde_json::json!({ "id": id }),
    ))
}

#[derive(Debug, Serialize)]
pub struct StageStatusResponse {
    pub contract_id: i64,
    pub status: String,
}

/// `GET /api/v1/contracts/{id}/ocr-status` (§6).
pub async fn ocr_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<StageStatusResponse>, ApiError> {
    let contract = load_contract(&state, id).await?;
    Ok(ApiResponse::ok(StageStatusResponse {
        contract_id: id,
        status: contract.ocr_status,
    }))
}

/// `GET /api/v1/contracts/{id}/content-status` (§6).
pub async fn content_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<StageStatusResponse>, ApiError> {
    let contract = load_contract(&state, id).await?;
    Ok(ApiResponse::ok(StageStatusResponse {
        contract_id: id,
        status: contract.content_status,
    }))
}

#[derive(Debug, Serialize)]
pub struct AutomatedStatusResponse {
    pub contract_id: i64,
    pub ocr_status: String,
    pub content_status: String,
    pub vector_status: String,
    pub elasticsearch_sync_status: String,
    pub overall_status: String,
}

/// `GET /api/v1/contracts/{id}/automated-status` (§6): `overall_status`
/// is `failed` if any stage failed, `completed` if all four stages are
/// `completed`, `pending` if all four are still `pending`, otherwise
/// `processing`.
pub async fn automated_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<AutomatedStatusResponse>, ApiError> {
    let contract = load_contract(&state, id).await?;

    let stages = [
        contract.ocr_status.as_str(),
        contract.content_status.as_str(),
        contract.vector_status.as_str(),
        contract.elasticsearch_sync_status.as_str(),
    ];
    let overall_status = compute_overall_status(&stages).to_string();

    Ok(ApiResponse::ok(AutomatedStatusResponse {
        contract_id: id,
        ocr_status: contract.ocr_status,
        content_status: contract.content_status,
        vector_status: contract.vector_status,
        elasticsearch_sync_status: contract.elasticsearch_sync_status,
        overall_status,
    }))
}

fn compute_overall_status(stages: &[&str; 4]) -> &'static str {
    if stages.iter().any(|s| *s == "failed") {
        "failed"
    } else if stages.iter().all(|s| *s == "completed") {
        "completed"
    } else if stages.iter().all(|s| *s == "pending") {
        "pending"
    } else {
        "processing"
    }
}

#[derive(Debug, Deserialize)]
pub struct ForceReprocessQuery {
    #[serde(default)]
    pub force_reprocess: bool,
}

/// `POST /api/v1/contracts/{id}/process-ocr` (§6): triggers the OCR
/// stage only, in the background.
pub async fn process_ocr(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    load_contract(&state, id).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_ocr_only(id).await {
            error!(contract_id = id, error = %e, "ocr stage failed");
        }
    });

    Ok(ApiResponse::ok_with_message(
        "OCR 处理已启动",
        serde_json::json!({ "contract_id": id }),
    ))
}

/// `POST /api/v1/contracts/{id}/process-content` (§6): triggers chunking
/// only, in the background (requires OCR to already be completed).
pub async fn process_content(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    load_contract(&state, id).await?;

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_content_only(id).await {
            error!(contract_id = id, error = %e, "content stage failed");
        }
    });

    Ok(ApiResponse::ok_with_message(
        "内容处理已启动",
        serde_json::json!({ "contract_id": id }),
    ))
}

/// `POST /api/v1/contracts/{id}/process-automated?force_reprocess=` (§6):
/// triggers the full pipeline; `force_reprocess=true` resets every stage
/// and re-runs it even if already `completed` (§4.8 `Reprocess`).
pub async fn process_automated(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(query): Query<ForceReprocessQuery>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    load_contract(&state, id).await?;
    let force = query.force_reprocess;
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.process_contract(id, force).await {
            error!(contract_id = id, force, error = %e, "automated pipeline failed");
        }
    });
    Ok(ApiResponse::ok_with_message(
        "自动化处理已启动",
        serde_json::json!({ "contract_id": id, "force_reprocess": force }),
    ))
}

/// `GET /api/v1/contracts/{id}/html-content` (§6): the OCR-derived HTML,
/// read straight off disk.
pub async fn html_content(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Response, ApiError> {
    let contract = load_contract(&state, id).await?;
    let path = contract
        .html_content_path
        .ok_or_else(|| ApiError::NotFound("contract has no derived HTML content yet".to_string()))?;

    let html = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ApiError::Io(format!("failed to read html content: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ChunksQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
    pub chunk_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub id: i64,
    pub chunk_index: i32,
    pub content_text: String,
    pub chunk_type: String,
    pub chunk_size: i32,
    pub vector_status: String,
}

impl From<crate::database::models::Chunk> for ChunkResponse {
    fn from(c: crate::database::models::Chunk) -> Self {
        Self {
            id: c.id,
            chunk_index: c.chunk_index,
            content_text: c.content_text,
            chunk_type: c.chunk_type,
            chunk_size: c.chunk_size,
            vector_status: c.vector_status,
        }
    }
}

/// `GET /api/v1/contracts/{id}/content/chunks?page=&size=&chunk_type=`
/// (§6).
pub async fn chunks(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(query): Query<ChunksQuery>,
) -> Result<ApiResponse<PaginatedResponse<ChunkResponse>>, ApiError> {
    load_contract(&state, id).await?;
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.size.unwrap_or(20).clamp(1, 100);

    let (chunks, total) = state
        .repository
        .get_chunks_paginated(id, page, page_size, query.chunk_type.as_deref())
        .await?;

    Ok(ApiResponse::ok(PaginatedResponse {
        items: chunks.into_iter().map(ChunkResponse::from).collect(),
        page,
        page_size,
        total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ContentSearchQuery {
    pub q: String,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ContentSearchHit {
    pub chunk_id: i64,
    pub chunk_index: i32,
    pub content_text: String,
    pub score: f32,
    pub highlights: Vec<String>,
}

/// `GET /api/v1/contracts/{id}/content/search?q=&page=&size=` (§6):
/// lexical search scoped to a single contract. Elasticsearch has no
/// native offset pagination over a fixed `size`, so the window is taken
/// from a single over-fetched result set (§9 Non-goals: "no search result
/// caching beyond one request").
pub async fn content_search(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(query): Query<ContentSearchQuery>,
) -> Result<ApiResponse<PaginatedResponse<ContentSearchHit>>, ApiError> {
    load_contract(&state, id).await?;
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.size.unwrap_or(20).clamp(1, 100);

    let fetch_limit = (page * page_size) as usize;
    let hits = state
        .lexical
        .search_contents(&query.q, Some(&[id]), fetch_limit)
        .await;

    let total = hits.len() as i64;
    let start = ((page - 1) * page_size) as usize;
    let page_hits: Vec<ContentSearchHit> = hits
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .map(|h| ContentSearchHit {
            chunk_id: h.chunk_id,
            chunk_index: h.chunk_index,
            content_text: h.content_text,
            score: h.score,
            highlights: h.highlights,
        })
        .collect();

    Ok(ApiResponse::ok(PaginatedResponse {
        items: page_hits,
        page,
        page_size,
        total,
    }))
}

#[derive(Debug, Serialize)]
pub struct ContractFieldResponse {
    pub id: i64,
    pub field_name: String,
    pub field_value: Option<String>,
    pub field_type: Option<String>,
}

impl From<crate::database::models::ContractField> for ContractFieldResponse {
    fn from(f: crate::database::models::ContractField) -> Self {
        Self {
            id: f.id,
            field_name: f.field_name,
            field_value: f.field_value,
            field_type: f.field_type,
        }
    }
}

/// `GET /api/v1/contracts/{id}/fields` (SPEC_FULL §6.1, supplemented):
/// ad-hoc extracted/annotated fields, independent of the chunk pipeline.
pub async fn fields(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<ApiResponse<Vec<ContractFieldResponse>>, ApiError> {
    load_contract(&state, id).await?;
    let fields = state.repository.list_contract_fields(id).await?;
    Ok(ApiResponse::ok(
        fields.into_iter().map(ContractFieldResponse::from).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        let (page, page_size) = normalize_pagination(&PaginationQuery { page: None, page_size: None });
        assert_eq!((page, page_size), (1, 20));

        let (page, page_size) =
            normalize_pagination(&PaginationQuery { page: Some(0), page_size: Some(500) });
        assert_eq!((page, page_size), (1, 100));

        let (page, page_size) =
            normalize_pagination(&PaginationQuery { page: Some(-5), page_size: Some(0) });
        assert_eq!((page, page_size), (1, 1));
    }

    #[test]
    fn percent_encode_filename_preserves_ascii_and_escapes_the_rest() {
        assert_eq!(percent_encode_filename("report.pdf"), "report.pdf");
        assert_eq!(percent_encode_filename("合同.pdf"), "%E5%90%88%E5%90%8C.pdf");
        assert_eq!(percent_encode_filename("a b.txt"), "a%20b.txt");
    }

    #[test]
    fn overall_status_failed_wins_over_everything_else() {
        assert_eq!(
            compute_overall_status(&["failed", "completed", "completed", "completed"]),
            "failed"
        );
    }

    #[test]
    fn overall_status_completed_requires_all_four_stages() {
        assert_eq!(
            compute_overall_status(&["completed", "completed", "completed", "completed"]),
            "completed"
        );
        assert_eq!(
            compute_overall_status(&["completed", "completed", "completed", "pending"]),
            "processing"
        );
    }

    #[test]
    fn overall_status_pending_requires_all_four_stages() {
        assert_eq!(
            compute_overall_status(&["pending", "pending", "pending", "pending"]),
            "pending"
        );
    }

    #[test]
    fn overall_status_mixed_progress_is_processing() {
        assert_eq!(
            compute_overall_status(&["completed", "processing", "pending", "pending"]),
            "processing"
        );
    }
}
