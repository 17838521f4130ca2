//! Error types for skinlens-ai
//!
//! Provider and enrichment failures are absorbed inside the pipeline (see
//! [`crate::providers::ProviderFailure`] and [`crate::enrichment::EnrichmentError`]).
//! Only [`AnalysisError`] reaches callers of the orchestration facade, and
//! [`ApiError`] is its HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Caller-visible analysis error
///
/// `Clone` so every waiter coalesced onto one computation receives the same error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Request failed structural validation
    #[error("Invalid analysis request: {0}")]
    InvalidRequest(String),

    /// Result cache fault (poisoned lock, aborted computation)
    #[error("Result cache fault: {0}")]
    Cache(String),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            AnalysisError::Cache(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

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
