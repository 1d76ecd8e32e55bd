//! Chatbot API handlers
//!
//! REST endpoints for session initialization, the conversational turn, and
//! the session debugging surface.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::models::{
    ChatRequest, ChatResponse, InitRequest, InitResponse, QueryRequest, QueryResponse,
    SchemaResponse, SessionStatsResponse, SessionValidity, ValidationHistoryResponse,
};
use crate::utils::{ApiError, ApiResult};

/// Initialize a session from a parsed flight log
/// POST /chatbot/init
#[utoipa::path(
    post,
    path = "/chatbot/init",
    request_body = InitRequest,
    responses(
        (status = 200, description = "Session created", body = InitResponse),
        (status = 400, description = "Malformed log body"),
        (status = 500, description = "Log ingestion failed")
    ),
    tag = "Chatbot"
)]
pub async fn init_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitRequest>,
) -> ApiResult<Json<InitResponse>> {
    if !req.log_data.is_object() {
        return Err(ApiError::bad_request("logData must be a JSON object"));
    }

    let session = state.registry.create(&req.log_data)?;

    Ok(Json(InitResponse {
        session_id: session.id.clone(),
        ingest: session.ingest_report.clone(),
        timestamp: Utc::now(),
    }))
}

/// One conversational turn against an initialized session
/// POST /chatbot/chat
#[utoipa::path(
    post,
    path = "/chatbot/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Terminal answer, clarification or refusal", body = ChatResponse),
        (status = 404, description = "Unknown or expired session"),
        (status = 422, description = "Missing message or session id"),
        (status = 503, description = "Language model unavailable")
    ),
    tag = "Chatbot"
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    req.validate()
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let session = state
        .registry
        .get(&req.session_id)
        .ok_or_else(|| ApiError::not_found("Session not found or expired, re-initialize via /chatbot/init"))?;

    // Turns on one session are serialized: a new turn observes all effects
    // of the previous one
    let _turn = session.turn_gate.lock().await;

    let outcome = state.agent.run_turn(&session, req.message.trim()).await?;

    tracing::info!(
        session_id = %session.id,
        refused = outcome.refused,
        best_effort = outcome.best_effort,
        round_trips = outcome.llm_round_trips,
        "Turn completed"
    );

    Ok(Json(ChatResponse {
        response: outcome.response,
        thinking: outcome.thinking,
        relevant_docs: outcome.relevant_docs,
        data_schema: session.schema.clone(),
        available_tables: session.available_tables(),
        query_validation: outcome.validation,
        timestamp: Utc::now(),
    }))
}

/// Check whether a session is alive
/// GET /chatbot/sessions/:id/validate
#[utoipa::path(
    get,
    path = "/chatbot/sessions/{id}/validate",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session is alive", body = SessionValidity),
        (status = 404, description = "Unknown or expired session", body = SessionValidity)
    ),
    tag = "Chatbot"
)]
pub async fn validate_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(session) => (
            StatusCode::OK,
            Json(SessionValidity { valid: true, session_id: Some(session.id.clone()) }),
        ),
        None => (StatusCode::NOT_FOUND, Json(SessionValidity { valid: false, session_id: None })),
    }
}

/// Schema of the tables derived from this session's log
/// GET /chatbot/sessions/:id/schema
#[utoipa::path(
    get,
    path = "/chatbot/sessions/{id}/schema",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Schema dump", body = SchemaResponse),
        (status = 404, description = "Unknown or expired session")
    ),
    tag = "Chatbot"
)]
pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SchemaResponse>> {
    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;

    Ok(Json(SchemaResponse {
        session_id: session.id.clone(),
        schema: session.schema.clone(),
        available_tables: session.available_tables(),
    }))
}

/// Execute a read-only query for debugging
/// POST /chatbot/sessions/:id/query
#[utoipa::path(
    post,
    path = "/chatbot/sessions/{id}/query",
    params(("id" = String, Path, description = "Session id")),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Query result", body = QueryResponse),
        (status = 400, description = "Rejected or failing SQL"),
        (status = 404, description = "Unknown or expired session")
    ),
    tag = "Chatbot"
)]
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    req.validate()
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;

    let output = session.store.query(&req.sql)?;
    let row_count = output.rows.len();

    Ok(Json(QueryResponse { columns: output.columns, rows: output.rows, row_count }))
}

/// Recent validation records of this session
/// GET /chatbot/sessions/:id/validation-history
#[utoipa::path(
    get,
    path = "/chatbot/sessions/{id}/validation-history",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Recent validation summaries", body = ValidationHistoryResponse),
        (status = 404, description = "Unknown or expired session")
    ),
    tag = "Chatbot"
)]
pub async fn validation_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ValidationHistoryResponse>> {
    let session = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;

    Ok(Json(ValidationHistoryResponse {
        session_id: session.id.clone(),
        history: session.validation_history(),
    }))
}

/// Aggregate counts over all live sessions
/// GET /chatbot/sessions/stats
#[utoipa::path(
    get,
    path = "/chatbot/sessions/stats",
    responses((status = 200, description = "Registry statistics", body = SessionStatsResponse)),
    tag = "Chatbot"
)]
pub async fn session_stats(State(state): State<Arc<AppState>>) -> Json<SessionStatsResponse> {
    let stats = state.registry.stats();
    Json(SessionStatsResponse {
        active_sessions: stats.active_sessions,
        total_messages: stats.total_messages,
        oldest_session_age_secs: stats.oldest_session_age_secs,
        timestamp: Utc::now(),
    })
}
