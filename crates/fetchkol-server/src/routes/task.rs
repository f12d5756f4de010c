//! Task status polling endpoint.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /task/{task_id}` — read a task row directly; never blocks on the
/// worker.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let row = state
        .coordinator
        .get_task_status(&task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;

    let mut body = json!({
        "task_id": row.task_id,
        "status": row.status,
    });
    if let Some(records) = row.result_records() {
        body["results"] = serde_json::to_value(records).unwrap_or(Value::Null);
    }
    if let Some(error) = &row.error {
        body["error"] = json!(error);
    }
    Ok(Json(body))
}
