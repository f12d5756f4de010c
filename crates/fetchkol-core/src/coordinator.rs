//! Task coordination: intake validation, task-id assignment, durable
//! insert, and work-item publication.
//!
//! One accepted request becomes exactly one task row and one work item. If
//! the insert succeeds but the publish fails, the row stays orphaned in
//! `pending`; callers time out and re-submit under a fresh timestamp, which
//! yields a distinct task id. No recovery sweeper exists.

use std::sync::Arc;

use crate::error::TaskError;
use crate::queue::{WorkItem, WorkQueue};
use crate::ratelimit::now_millis;
use crate::storage::tasks::{self, TaskRow};
use crate::storage::DbPool;
use crate::task::{
    derive_task_id, Action, Platform, SearchParams, SimilarParams, TaskStatus,
};

/// Upper bound on requested counts.
const MAX_COUNT: i64 = 100;

/// Outcome of an accepted submission.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Submission {
    /// Deterministic task id.
    pub task_id: String,
    /// Always `pending` at submission time.
    pub status: TaskStatus,
}

/// Accepts validated fetch requests and feeds the worker pipeline.
pub struct Coordinator {
    pool: DbPool,
    queue: Arc<dyn WorkQueue>,
}

impl Coordinator {
    /// Build a coordinator over the task log and work queue.
    pub fn new(pool: DbPool, queue: Arc<dyn WorkQueue>) -> Self {
        Self { pool, queue }
    }

    /// Submit a `similar` task.
    pub async fn submit_similar(
        &self,
        platform: Platform,
        params: SimilarParams,
    ) -> Result<Submission, TaskError> {
        if params.username.is_empty() {
            return Err(TaskError::MissingParam {
                name: "username".to_string(),
            });
        }
        validate_count(i64::from(params.count))?;
        if let Some(follows) = &params.follows {
            follows.validate()?;
        }
        if let Some(avg_views) = &params.avg_views {
            avg_views.validate()?;
        }

        let value = serde_json::to_value(&params).unwrap_or_default();
        self.submit(platform, Action::Similar, value).await
    }

    /// Submit a `search` task.
    pub async fn submit_search(
        &self,
        platform: Platform,
        params: SearchParams,
    ) -> Result<Submission, TaskError> {
        if params.query.is_empty() {
            return Err(TaskError::MissingParam {
                name: "query".to_string(),
            });
        }
        validate_count(i64::from(params.count))?;
        if let Some(follows) = &params.follows {
            follows.validate()?;
        }

        let value = serde_json::to_value(&params).unwrap_or_default();
        self.submit(platform, Action::Search, value).await
    }

    async fn submit(
        &self,
        platform: Platform,
        action: Action,
        params: serde_json::Value,
    ) -> Result<Submission, TaskError> {
        let task_id = derive_task_id(now_millis(), platform, action);

        tasks::insert_task(&self.pool, &task_id, platform.as_str(), action.as_str(), &params)
            .await?;

        let item = WorkItem {
            task_id: task_id.clone(),
            platform,
            action,
            params,
        };
        if let Err(e) = self.queue.publish(item).await {
            // Orphaned-pending is acceptable: the caller times out and
            // re-submits under a new timestamp.
            tracing::warn!(task_id, error = %e, "work item publish failed, task left pending");
        }

        tracing::info!(task_id, platform = %platform, action = %action, "task accepted");
        Ok(Submission {
            task_id,
            status: TaskStatus::Pending,
        })
    }

    /// Read a task row directly; never blocks on the worker.
    pub async fn get_task_status(&self, task_id: &str) -> Result<Option<TaskRow>, TaskError> {
        Ok(tasks::get_task(&self.pool, task_id).await?)
    }
}

fn validate_count(count: i64) -> Result<(), TaskError> {
    if count <= 0 || count > MAX_COUNT {
        return Err(TaskError::CountOutOfRange {
            count,
            max: MAX_COUNT,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::queue::memory_queue;
    use crate::storage::init_test_db;
    use crate::task::RangeFilter;

    fn similar_params(count: u32) -> SimilarParams {
        SimilarParams {
            username: "jack".to_string(),
            uid: None,
            count,
            follows: None,
            avg_views: None,
        }
    }

    async fn coordinator() -> (Coordinator, crate::queue::MemoryWorkSource) {
        let pool = init_test_db().await.expect("db");
        let (queue, source) = memory_queue(16);
        (Coordinator::new(pool, Arc::new(queue)), source)
    }

    #[tokio::test]
    async fn submit_inserts_row_and_enqueues() {
        let (coordinator, mut source) = coordinator().await;
        let submission = coordinator
            .submit_similar(Platform::Twitter, similar_params(5))
            .await
            .expect("submit");

        assert_eq!(submission.status, TaskStatus::Pending);
        assert_eq!(submission.task_id.len(), 32);

        let row = coordinator
            .get_task_status(&submission.task_id)
            .await
            .expect("get")
            .expect("row");
        assert_eq!(row.status, "pending");
        assert_eq!(row.platform, "twitter");

        let item = source.next().await.expect("work item");
        assert_eq!(item.task_id, submission.task_id);
        assert_eq!(item.params["username"], "jack");
    }

    #[tokio::test]
    async fn count_bounds_enforced() {
        let (coordinator, _source) = coordinator().await;
        assert!(matches!(
            coordinator
                .submit_similar(Platform::Twitter, similar_params(0))
                .await,
            Err(TaskError::CountOutOfRange { .. })
        ));
        assert!(matches!(
            coordinator
                .submit_similar(Platform::Twitter, similar_params(101))
                .await,
            Err(TaskError::CountOutOfRange { .. })
        ));
        assert!(coordinator
            .submit_similar(Platform::Twitter, similar_params(100))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn negative_follower_bound_rejected() {
        let (coordinator, _source) = coordinator().await;
        let mut params = similar_params(5);
        params.follows = Some(RangeFilter {
            min: Some(-1),
            max: None,
        });
        assert!(matches!(
            coordinator.submit_similar(Platform::Twitter, params).await,
            Err(TaskError::NegativeFollowerBound { value: -1 })
        ));

        let mut params = similar_params(5);
        params.follows = Some(RangeFilter {
            min: Some(0),
            max: None,
        });
        assert!(coordinator
            .submit_similar(Platform::Twitter, params)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn missing_username_rejected() {
        let (coordinator, _source) = coordinator().await;
        let mut params = similar_params(5);
        params.username = String::new();
        assert!(matches!(
            coordinator.submit_similar(Platform::Twitter, params).await,
            Err(TaskError::MissingParam { .. })
        ));
    }

    #[tokio::test]
    async fn publish_failure_leaves_pending_row() {
        struct ClosedQueue;

        #[async_trait::async_trait]
        impl WorkQueue for ClosedQueue {
            async fn publish(&self, _item: WorkItem) -> Result<(), QueueError> {
                Err(QueueError::Closed)
            }
        }

        let pool = init_test_db().await.expect("db");
        let coordinator = Coordinator::new(pool, Arc::new(ClosedQueue));

        let submission = coordinator
            .submit_similar(Platform::Twitter, similar_params(5))
            .await
            .expect("submit despite publish failure");

        let row = coordinator
            .get_task_status(&submission.task_id)
            .await
            .expect("get")
            .expect("row");
        assert_eq!(row.status, "pending");
    }

    #[tokio::test]
    async fn unknown_task_is_none() {
        let (coordinator, _source) = coordinator().await;
        assert!(coordinator
            .get_task_status("deadbeef")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn search_query_required() {
        let (coordinator, _source) = coordinator().await;
        let params = SearchParams {
            query: String::new(),
            count: 10,
            follows: None,
        };
        assert!(matches!(
            coordinator.submit_search(Platform::Twitter, params).await,
            Err(TaskError::MissingParam { .. })
        ));
    }
}
