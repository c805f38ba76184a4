//! Memory REST API handlers: store, retrieve, visual store, pattern and
//! evolution listings, and per-instance clearing.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::Value;

use engram_types::analysis::{DiscoveredPattern, EvolutionEvent, HistoryQuery, PatternQuery};
use engram_types::memory::{
    ClearMemoriesReport, MemoryContext, MemoryMetadata, MemoryType, RetrieveOptions,
    deserialize_agent_id,
};
use engram_types::visual::VisualMemoryRequest;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    pub content: Value,
    pub context: MemoryContext,
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    #[serde(default)]
    pub query: String,
    pub context: MemoryContext,
    #[serde(default)]
    pub options: Option<RetrieveOptions>,
}

#[derive(Debug, Deserialize)]
pub struct VisualRequest {
    #[serde(deserialize_with = "deserialize_agent_id")]
    pub agent_id: String,
    pub user_id: String,
    #[serde(default = "default_visual_type")]
    pub memory_type: MemoryType,
    #[serde(flatten)]
    pub request: VisualMemoryRequest,
}

fn default_visual_type() -> MemoryType {
    MemoryType::Episodic
}

fn require_user(user_id: &str) -> Result<(), AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("user_id must not be empty".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/memory/store
pub async fn store_memory(
    State(state): State<AppState>,
    Json(body): Json<StoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    require_user(&body.context.user_id)?;
    if body.content.is_null() {
        return Err(AppError::Validation("content must not be null".to_string()));
    }

    tracing::debug!(
        request_id = timer.request_id(),
        agent_id = %body.context.agent_id,
        user_id = %body.context.user_id,
        "store request"
    );

    let response = state
        .memory
        .store_memory(body.content, body.context, body.metadata)
        .await;
    let failure = response.error.clone();
    Ok(ApiResponse::outcome(response, failure.as_deref(), "STORE_FAILED", &timer))
}

/// POST /api/v1/memory/retrieve
pub async fn retrieve_memory(
    State(state): State<AppState>,
    Json(body): Json<RetrieveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    require_user(&body.context.user_id)?;

    let response = state
        .memory
        .retrieve_memory(&body.query, &body.context, body.options)
        .await;
    let failure = response.error.clone();
    Ok(ApiResponse::outcome(response, failure.as_deref(), "RETRIEVE_FAILED", &timer))
}

/// POST /api/v1/memory/visual
pub async fn store_visual_memory(
    State(state): State<AppState>,
    Json(body): Json<VisualRequest>,
) -> Result<impl IntoResponse, AppError> {
    let timer = RequestTimer::start();
    require_user(&body.user_id)?;
    if !matches!(body.memory_type, MemoryType::Working | MemoryType::Episodic) {
        return Err(AppError::Validation(format!(
            "visual memories are stored as working or episodic, not {}",
            body.memory_type
        )));
    }

    let response = state
        .memory
        .store_visual_memory(&body.agent_id, &body.user_id, body.memory_type, body.request)
        .await;
    let failure = response.error.clone();
    Ok(ApiResponse::outcome(response, failure.as_deref(), "VISUAL_STORE_FAILED", &timer))
}

/// GET /api/v1/memory/{agent}/{user}/patterns
pub async fn get_patterns(
    State(state): State<AppState>,
    Path((agent_id, user_id)): Path<(String, String)>,
    Query(query): Query<PatternQuery>,
) -> Result<ApiResponse<Vec<DiscoveredPattern>>, AppError> {
    let timer = RequestTimer::start();
    let patterns = state
        .memory
        .get_discovered_patterns(&agent_id, &user_id, &query)
        .await?;
    Ok(ApiResponse::success(patterns, &timer)
        .with_link("evolution", &format!("/api/v1/memory/{agent_id}/{user_id}/evolution")))
}

/// GET /api/v1/memory/{agent}/{user}/evolution
pub async fn get_evolution_history(
    State(state): State<AppState>,
    Path((agent_id, user_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<ApiResponse<Vec<EvolutionEvent>>, AppError> {
    let timer = RequestTimer::start();
    let events = state
        .memory
        .get_evolution_history(&agent_id, &user_id, &query)
        .await?;
    Ok(ApiResponse::success(events, &timer)
        .with_link("patterns", &format!("/api/v1/memory/{agent_id}/{user_id}/patterns")))
}

/// DELETE /api/v1/memory/{agent}/{user}
pub async fn clear_memories(
    State(state): State<AppState>,
    Path((agent_id, user_id)): Path<(String, String)>,
) -> Result<ApiResponse<ClearMemoriesReport>, AppError> {
    let timer = RequestTimer::start();
    require_user(&user_id)?;
    let report = state.memory.clear_memories(&agent_id, &user_id).await;
    let failure = report.error.clone();
    Ok(ApiResponse::outcome(report, failure.as_deref(), "CLEAR_FAILED", &timer))
}
