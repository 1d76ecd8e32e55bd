//! Doc Index API handlers
//!
//! Status, refresh and cache management for the documentation index.

use axum::{Json, extract::State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;
use crate::services::DocIndexStatus;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RefreshRequest {
    /// Re-embed even when the source content hash is unchanged
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub chunk_count: usize,
    pub status: DocIndexStatus,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub cleared: bool,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Doc index status
/// GET /chatbot/docs/status
#[utoipa::path(
    get,
    path = "/chatbot/docs/status",
    responses((status = 200, description = "Index status", body = DocIndexStatus)),
    tag = "Docs"
)]
pub async fn docs_status(State(state): State<Arc<AppState>>) -> Json<DocIndexStatus> {
    Json(state.doc_index.status().await)
}

/// Re-fetch documentation sources, re-embedding what changed
/// POST /chatbot/docs/refresh
#[utoipa::path(
    post,
    path = "/chatbot/docs/refresh",
    request_body(content = RefreshRequest, description = "Optional force flag"),
    responses((status = 200, description = "Refresh outcome", body = RefreshResponse)),
    tag = "Docs"
)]
pub async fn refresh_docs(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RefreshRequest>>,
) -> Json<RefreshResponse> {
    let force = body.map(|Json(req)| req.force).unwrap_or(false);
    let chunk_count = state.doc_index.refresh(force).await;
    Json(RefreshResponse {
        chunk_count,
        status: state.doc_index.status().await,
        timestamp: Utc::now(),
    })
}

/// Purge the persistent embedding cache
/// POST /chatbot/docs/clear-cache
#[utoipa::path(
    post,
    path = "/chatbot/docs/clear-cache",
    responses((status = 200, description = "Cache purge outcome", body = ClearCacheResponse)),
    tag = "Docs"
)]
pub async fn clear_docs_cache(State(state): State<Arc<AppState>>) -> Json<ClearCacheResponse> {
    let cleared = state.doc_index.clear_cache().await;
    Json(ClearCacheResponse { cleared, timestamp: Utc::now() })
}
