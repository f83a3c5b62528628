//! Uniform error taxonomy for the knowledge ingestion & retrieval core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Behavioral error categories. Every public operation returns one of these
/// rather than letting an infrastructure error escape unclassified.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("quota exceeded")]
    QuotaExceeded { message: String, client_message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        AppError::Upstream(err.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to an external caller. Upstream/Internal
    /// details are logged in full but never echoed verbatim here.
    fn client_message(&self) -> String {
        match self {
            AppError::Validation(m) | AppError::Authorization(m) | AppError::NotFound(m) => m.clone(),
            AppError::Upstream(_) => "an upstream service failed to respond".to_string(),
            AppError::QuotaExceeded { client_message, .. } => client_message.clone(),
            AppError::Internal(_) => "an internal error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        let status = self.status();
        let message = self.client_message();
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
