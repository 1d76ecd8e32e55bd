//! API error type shared by all handlers.
//!
//! Low-level service errors are converted into an `ApiError` carrying the
//! HTTP status and a user-safe message. Provider error bodies and internal
//! details stay in the logs, never in responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;

use crate::services::agent::AgentError;
use crate::services::ingest::IngestError;
use crate::services::llm::LLMError;
use crate::services::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Sql(_) | StoreError::ReadOnly | StoreError::UnknownTable(_) => {
                Self::bad_request(err.to_string())
            },
            _ => Self::internal_error(err.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match &err {
            IngestError::MalformedLog(_) => Self::bad_request(err.to_string()),
            _ => Self::internal_error(format!("Log ingestion failed: {}", err)),
        }
    }
}

impl From<LLMError> for ApiError {
    fn from(err: LLMError) -> Self {
        tracing::error!("LLM gateway error: {}", err);
        Self::service_unavailable("The language model is temporarily unavailable, please retry")
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Deadline(_) => {
                Self::service_unavailable("The analysis did not complete in time, please retry")
            },
            AgentError::Gateway(inner) => inner.into(),
        }
    }
}
