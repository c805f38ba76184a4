//! Service-wide handlers: statistics, evolution totals, and health.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use engram_types::analysis::EvolutionStats;
use engram_types::stats::SystemStats;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResponse<SystemStats> {
    let timer = RequestTimer::start();
    let stats = state.memory.get_system_stats().await;
    ApiResponse::success(stats, &timer).with_link("evolution", "/api/v1/evolution/stats")
}

/// GET /api/v1/evolution/stats
pub async fn get_evolution_stats(
    State(state): State<AppState>,
) -> Result<ApiResponse<EvolutionStats>, AppError> {
    let timer = RequestTimer::start();
    let stats = state.memory.get_evolution_stats().await?;
    Ok(ApiResponse::success(stats, &timer))
}

/// GET /health
///
/// Plain JSON health report; 503 when storage is unreachable.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.memory.health_check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
