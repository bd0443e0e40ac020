use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One of `pending|processing|completed|failed`, per the four status
/// columns on `Contract` (§3). Stored as plain `text` in Postgres — a
/// constraint in the migration enforces the closed set.
pub type StageStatus = String;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub contract_number: String,
    pub contract_name: String,
    pub contract_type: Option<String>,
    pub original_filename: String,
    pub stored_path: String,
    pub file_size: i64,
    pub file_format: String,
    pub upload_time: DateTime<Utc>,
    pub html_content_path: Option<String>,
    pub text_content_path: Option<String>,
    pub ocr_status: StageStatus,
    pub content_status: StageStatus,
    pub vector_status: StageStatus,
    pub elasticsearch_sync_status: StageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Paragraph,
    Table,
    List,
    Title,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Paragraph => "paragraph",
            ChunkType::Table => "table",
            ChunkType::List => "list",
            ChunkType::Title => "title",
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(ChunkType::Paragraph),
            "table" => Ok(ChunkType::Table),
            "list" => Ok(ChunkType::List),
            "title" => Ok(ChunkType::Title),
            other => Err(anyhow::anyhow!("unknown chunk_type: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub contract_id: i64,
    pub chunk_index: i32,
    pub content_text: String,
    pub chunk_type: String,
    pub chunk_size: i32,
    pub vector_id: Option<String>,
    pub vector_status: StageStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QaSession {
    pub session_id: String,
    pub session_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QaSessionTurn {
    pub id: i64,
    pub session_id: String,
    pub message_order: i32,
    pub question: String,
    pub answer: String,
    pub source_contracts: serde_json::Value,
    pub source_chunks: serde_json::Value,
    pub pipeline_trace: serde_json::Value,
    pub search_method: Option<String>,
    pub response_time_ms: i64,
    pub user_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Analytics-only record of one C9 execution, independent of whether a
/// session turn was ultimately persisted. Supplemented from
/// `original_source` (`models.py::SearchLog`) — not in the distilled spec's
/// core data model, not read back by the query pipeline.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SearchLog {
    pub id: i64,
    pub session_id: Option<String>,
    pub question: String,
    pub search_method: Option<String>,
    pub result_count: i32,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Ad-hoc extracted/annotated field on a contract. Supplemented from
/// `models.py::ContractField`; no pipeline stage depends on it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContractField {
    pub id: i64,
    pub contract_id: i64,
    pub field_name: String,
    pub field_value: Option<String>,
    pub field_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Runtime-mutable key/value configuration, supplemented from
/// `models.py::SystemConfig`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemConfig {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}
