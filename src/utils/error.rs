use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;

static DEBUG_MODE: OnceCell<bool> = OnceCell::new();

/// Called once at startup from `Settings.server.debug`. Controls whether
/// `ApiError::Internal` messages are surfaced verbatim or masked (§7).
pub fn set_debug_mode(debug: bool) {
    let _ = DEBUG_MODE.set(debug);
}

fn debug_mode() -> bool {
    *DEBUG_MODE.get().unwrap_or(&false)
}

/// Error kinds, one per §7 of the spec. Each maps to a fixed HTTP status
/// and is distinguished in logs via its own tracing level/event.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "Validation",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Unavailable(_) => "Unavailable",
            ApiError::Upstream(_) => "Upstream",
            ApiError::Timeout(_) => "Timeout",
            ApiError::Io(_) => "IO",
            ApiError::Internal(_) => "Internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    data: Option<()>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(msg) => {
                tracing::warn!(kind = "Validation", %msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::NotFound(msg) => {
                tracing::warn!(kind = "NotFound", %msg);
                (StatusCode::NOT_FOUND, msg.clone())
            }
            ApiError::Conflict(msg) => {
                tracing::warn!(kind = "Conflict", %msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::Unavailable(msg) => {
                tracing::error!(kind = "Unavailable", %msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            ApiError::Upstream(msg) => {
                tracing::error!(kind = "Upstream", %msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            ApiError::Timeout(msg) => {
                tracing::error!(kind = "Timeout", %msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            ApiError::Io(msg) => {
                tracing::error!(kind = "IO", %msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            ApiError::Internal(msg) => {
                tracing::error!(kind = "Internal", %msg);
                let visible = if debug_mode() {
                    msg.clone()
                } else {
                    "an internal error occurred".to_string()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, visible)
            }
        };

        let body = Json(ErrorBody {
            success: false,
            message,
            data: None,
        });

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("record not found".to_string()),
            other => ApiError::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else {
            ApiError::Upstream(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("serialization error: {err}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<sqlx::Error>() {
            Ok(sqlx_err) => sqlx_err.into(),
            Err(err) => ApiError::Internal(err.to_string()),
        }
    }
}
