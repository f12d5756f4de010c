//! fetchkol HTTP intake server.
//!
//! Exposes the task coordinator as a small REST surface: submit similar /
//! search fetch tasks, poll task status, and a component health check.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router with all API routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/fetch/similar", post(routes::fetch::similar))
        .route("/fetch/search", post(routes::fetch::search))
        .route("/task/{task_id}", get(routes::task::status))
        .route("/health", get(routes::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
