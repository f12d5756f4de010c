//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health` — component status for the database and work queue.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let database = match fetchkol_core::storage::ping(&state.db).await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unreachable");
            "unavailable"
        }
    };
    let workqueue = if state.queue.healthy() { "ok" } else { "unavailable" };

    let status = if database == "ok" && workqueue == "ok" {
        "ok"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "components": {
            "database": database,
            "workqueue": workqueue,
        }
    }))
}
