//! Axum router configuration with middleware.
//!
//! Memory routes live under `/api/v1/`; `/health` sits at the root so load
//! balancers can probe it without the version prefix.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/memory/store", post(handlers::memory::store_memory))
        .route("/memory/retrieve", post(handlers::memory::retrieve_memory))
        .route("/memory/visual", post(handlers::memory::store_visual_memory))
        .route(
            "/memory/{agent}/{user}/patterns",
            get(handlers::memory::get_patterns),
        )
        .route(
            "/memory/{agent}/{user}/evolution",
            get(handlers::memory::get_evolution_history),
        )
        .route("/memory/{agent}/{user}", delete(handlers::memory::clear_memories))
        .route("/evolution/stats", get(handlers::system::get_evolution_stats))
        .route("/stats", get(handlers::system::get_stats));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::system::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
