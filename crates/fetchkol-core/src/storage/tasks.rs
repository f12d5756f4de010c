//! CRUD operations for the fetch task log.
//!
//! Inserts and terminal updates are retried up to 3 times with exponential
//! backoff, matching the write guarantees the coordinator and worker rely
//! on. Terminal updates are guarded by `status = 'pending'` so a row can
//! reach `completed` or `failed` exactly once and never move backward.

use std::time::Duration;

use super::DbPool;
use crate::error::StorageError;
use crate::fetch::UserRecord;

/// Write attempts for inserts and terminal updates.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Base backoff between attempts; doubles per retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// A durable task row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct TaskRow {
    /// Surrogate primary key.
    pub id: i64,
    /// Deterministic 32-hex task id.
    pub task_id: String,
    /// Platform wire name.
    pub platform: String,
    /// Action wire name.
    pub action: String,
    /// Action parameters as a JSON document.
    pub params: String,
    /// Durable status: pending, completed, or failed.
    pub status: String,
    /// Result list as a JSON document; set on completion.
    pub result: Option<String>,
    /// Failure reason; set on failure.
    pub error: Option<String>,
    /// ISO-8601 UTC insertion timestamp, immutable.
    pub created_at: String,
}

impl TaskRow {
    /// Decode the result column into user records, if present.
    pub fn result_records(&self) -> Option<Vec<UserRecord>> {
        self.result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Insert a pending task row. Retried on transient failure; a UNIQUE
/// violation on `task_id` is returned immediately since retrying cannot
/// help.
pub async fn insert_task(
    pool: &DbPool,
    task_id: &str,
    platform: &str,
    action: &str,
    params: &serde_json::Value,
) -> Result<(), StorageError> {
    let params_json = params.to_string();
    let mut attempt = 0;
    loop {
        let outcome = sqlx::query(
            "INSERT INTO fetch_tasks (task_id, platform, action, params, status) \
             VALUES (?, ?, ?, ?, 'pending')",
        )
        .bind(task_id)
        .bind(platform)
        .bind(action)
        .bind(&params_json)
        .execute(pool)
        .await;

        match outcome {
            Ok(_) => return Ok(()),
            Err(e) => {
                attempt += 1;
                let unique_violation = e
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation());
                if unique_violation || attempt >= MAX_WRITE_ATTEMPTS {
                    return Err(StorageError::Query { source: e });
                }
                tracing::warn!(task_id, attempt, error = %e, "task insert failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF * 2u32.pow(attempt - 1)).await;
            }
        }
    }
}

/// Best-effort running mark.
///
/// `running` is not a durable status, so the CHECK constraint rejects this
/// write; callers treat any error as ignorable. The attempt is kept so a
/// deployment that widens the constraint gets the mark for free.
pub async fn mark_task_running(pool: &DbPool, task_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE fetch_tasks SET status = 'running' WHERE task_id = ? AND status = 'pending'")
        .bind(task_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Write the terminal `completed` state with the result list.
pub async fn complete_task(
    pool: &DbPool,
    task_id: &str,
    result: &[UserRecord],
) -> Result<(), StorageError> {
    let result_json =
        serde_json::to_string(result).unwrap_or_else(|_| "[]".to_string());
    update_terminal(pool, task_id, "completed", Some(&result_json), None).await
}

/// Write the terminal `failed` state with the error reason.
pub async fn fail_task(pool: &DbPool, task_id: &str, error: &str) -> Result<(), StorageError> {
    update_terminal(pool, task_id, "failed", None, Some(error)).await
}

async fn update_terminal(
    pool: &DbPool,
    task_id: &str,
    status: &str,
    result: Option<&str>,
    error: Option<&str>,
) -> Result<(), StorageError> {
    let mut attempt = 0;
    loop {
        let outcome = sqlx::query(
            "UPDATE fetch_tasks SET status = ?, result = ?, error = ? \
             WHERE task_id = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(result)
        .bind(error)
        .bind(task_id)
        .execute(pool)
        .await;

        match outcome {
            Ok(done) => {
                if done.rows_affected() == 0 {
                    tracing::warn!(task_id, status, "terminal update matched no pending row");
                }
                return Ok(());
            }
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_WRITE_ATTEMPTS {
                    return Err(StorageError::Query { source: e });
                }
                tracing::warn!(task_id, attempt, error = %e, "terminal update failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF * 2u32.pow(attempt - 1)).await;
            }
        }
    }
}

/// Fetch a task row by its task id. Returns `None` if unknown.
pub async fn get_task(pool: &DbPool, task_id: &str) -> Result<Option<TaskRow>, StorageError> {
    sqlx::query_as::<_, TaskRow>("SELECT * FROM fetch_tasks WHERE task_id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })
}
