//! Error types for dd-analyzer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::PipelineError;
use crate::services::zip_ingest::IngestError;
use crate::services::BlueprintError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., analysis already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Required dependency not available (503) - e.g., no LLM API key
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// dd-common error
    #[error("Common error: {0}")]
    Common(dd_common::Error),
}

impl From<dd_common::Error> for ApiError {
    fn from(err: dd_common::Error) -> Self {
        match err {
            dd_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            dd_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Storage(e) => ApiError::Common(e),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AlreadyComplete(run_id) => {
                ApiError::Conflict(format!("Run {} has already completed", run_id))
            }
            PipelineError::RunNotFound(run_id) => {
                ApiError::NotFound(format!("Analysis run not found: {}", run_id))
            }
            PipelineError::LlmUnavailable => ApiError::ServiceUnavailable(
                "LLM API key not configured (POST /api/settings/llm_api_key)".to_string(),
            ),
            PipelineError::Invalid(msg) => ApiError::BadRequest(msg),
            PipelineError::Blueprint(e) => ApiError::from(e),
            PipelineError::Common(e) => ApiError::from(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<BlueprintError> for ApiError {
    fn from(err: BlueprintError) -> Self {
        match err {
            BlueprintError::Unknown(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Common(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
