//! Wire types for the chatbot HTTP surface.
//!
//! The wire format is stable: camelCase keys, RFC 3339 timestamps, numbers
//! emitted as JSON reals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::log::{IngestReport, LogSchema};
use crate::services::doc_index::DocSearchHit;
use crate::services::validator::ValidationSummary;

/// Body of POST /chatbot/init
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    /// Parsed telemetry log: message type -> fields
    #[schema(value_type = Object)]
    pub log_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub session_id: String,
    pub ingest: IngestReport,
    pub timestamp: DateTime<Utc>,
}

/// Body of POST /chatbot/chat
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[validate(length(min = 1, message = "message must not be empty"))]
    pub message: String,
    #[validate(length(min = 1, message = "sessionId must not be empty"))]
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Final assistant text (ANSWER:/CLARIFICATION: shaped, or a refusal)
    pub response: String,
    /// Human-readable trace of the agent's steps during this turn
    pub thinking: Vec<String>,
    pub relevant_docs: Vec<DocSearchHit>,
    pub data_schema: LogSchema,
    pub available_tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_validation: Option<ValidationSummary>,
    pub timestamp: DateTime<Utc>,
}

/// GET /chatbot/sessions/:id/validate
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionValidity {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaResponse {
    pub session_id: String,
    pub schema: LogSchema,
    pub available_tables: Vec<String>,
}

/// Body of POST /chatbot/sessions/:id/query (debugging surface)
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct QueryRequest {
    #[validate(length(min = 1, message = "sql must not be empty"))]
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub columns: Vec<String>,
    #[schema(value_type = Vec<Vec<Object>>)]
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationHistoryResponse {
    pub session_id: String,
    pub history: Vec<ValidationSummary>,
}

/// GET /chatbot/sessions/stats
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatsResponse {
    pub active_sessions: usize,
    pub total_messages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_session_age_secs: Option<i64>,
    pub timestamp: DateTime<Utc>,
}
