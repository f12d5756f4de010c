//! Sequential worker dispatcher.
//!
//! Pulls one work item at a time, selects the handler for the item's
//! (platform, action) pair, and runs it on the cooperative scheduler. Each
//! task gets its own credential pool, released in a guaranteed epilogue
//! whatever the outcome. Terminal state is written back to the task log;
//! handler errors become `failed`.

pub mod handlers;

use std::sync::Arc;

use crate::aggregator::{SimilarRequest, SimilarUserAggregator};
use crate::config::Config;
use crate::credentials::admin::AdminClient;
use crate::credentials::pool::CredentialPool;
use crate::error::FetchError;
use crate::fetch::instagram::InstagramFetcher;
use crate::fetch::tiktok::TiktokFetcher;
use crate::fetch::twitter::TwitterFetcher;
use crate::fetch::UserRecord;
use crate::queue::{MemoryWorkSource, WorkItem};
use crate::ratelimit::RateLimitStore;
use crate::storage::{tasks, DbPool};
use crate::task::{Action, Platform, SearchParams, SimilarParams};

use handlers::{InstagramOps, TiktokOps, TwitterOps};

/// Worker over one queue partition.
pub struct Dispatcher {
    config: Config,
    db: DbPool,
    store: Arc<dyn RateLimitStore>,
}

impl Dispatcher {
    /// Build a dispatcher.
    pub fn new(config: Config, db: DbPool, store: Arc<dyn RateLimitStore>) -> Self {
        Self { config, db, store }
    }

    /// Consume the queue until every publisher is gone.
    /// Tasks are processed strictly sequentially.
    pub async fn run(&self, mut source: MemoryWorkSource) {
        tracing::info!("worker dispatcher started");
        while let Some(item) = source.next().await {
            self.process(item).await;
        }
        tracing::info!("worker dispatcher stopped");
    }

    /// Process one work item to its terminal state.
    pub async fn process(&self, item: WorkItem) {
        let task_id = item.task_id.clone();
        tracing::info!(task_id, platform = %item.platform, action = %item.action, "task started");

        // Best-effort running mark; the durable schema only holds terminal
        // states, so rejection here is expected and ignored.
        if let Err(e) = tasks::mark_task_running(&self.db, &task_id).await {
            tracing::debug!(task_id, error = %e, "running mark not persisted");
        }

        match self.handle(&item).await {
            Ok(records) => {
                tracing::info!(task_id, result_count = records.len(), "task completed");
                if let Err(e) = tasks::complete_task(&self.db, &task_id, &records).await {
                    tracing::error!(task_id, error = %e, "failed to write completed state");
                }
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "task failed");
                if let Err(write_err) = tasks::fail_task(&self.db, &task_id, &e.to_string()).await {
                    tracing::error!(task_id, error = %write_err, "failed to write failed state");
                }
            }
        }
    }

    /// Run the handler with a per-task credential pool and a guaranteed
    /// release epilogue.
    async fn handle(&self, item: &WorkItem) -> Result<Vec<UserRecord>, FetchError> {
        let admin = Arc::new(AdminClient::new(&self.config.admin.base_url, item.platform));
        let pool = Arc::new(CredentialPool::new(admin, self.config.credentials.clone()));

        let outcome = self.dispatch(item, pool.clone()).await;
        pool.release().await;
        outcome
    }

    async fn dispatch(
        &self,
        item: &WorkItem,
        pool: Arc<CredentialPool>,
    ) -> Result<Vec<UserRecord>, FetchError> {
        match (item.platform, item.action) {
            (Platform::Twitter, Action::Similar) => {
                let params = similar_params(&item.params)?;
                let fetcher = TwitterFetcher::new(&self.config, pool, self.store.clone())?;
                let ops = Arc::new(TwitterOps::new(fetcher));
                let aggregator =
                    SimilarUserAggregator::new(ops, self.config.aggregator.clone());
                aggregator.run(&similar_request(&params)).await
            }
            (Platform::Twitter, Action::Search) => {
                let params = search_params(&item.params)?;
                let fetcher = TwitterFetcher::new(&self.config, pool, self.store.clone())?;
                let users = fetcher
                    .search_users(&params.query, params.count as usize)
                    .await?;
                Ok(apply_follows_filter(users, &params))
            }
            (Platform::Instagram, Action::Similar) => {
                let params = similar_params(&item.params)?;
                let fetcher = InstagramFetcher::new(&self.config, pool)?;
                let ops = Arc::new(InstagramOps::new(fetcher));
                let aggregator =
                    SimilarUserAggregator::new(ops, self.config.aggregator.clone());
                aggregator.run(&similar_request(&params)).await
            }
            (Platform::Instagram, Action::Search) => {
                let params = search_params(&item.params)?;
                let fetcher = InstagramFetcher::new(&self.config, pool)?;
                let users = fetcher
                    .search_users(&params.query, params.count as usize)
                    .await?;
                Ok(apply_follows_filter(users, &params))
            }
            (Platform::Tiktok, Action::Similar) => {
                let params = similar_params(&item.params)?;
                let fetcher = TiktokFetcher::new(&self.config)?;
                let ops = Arc::new(TiktokOps::new(fetcher));
                let aggregator =
                    SimilarUserAggregator::new(ops, self.config.aggregator.clone());
                aggregator.run(&similar_request(&params)).await
            }
            (Platform::Tiktok, Action::Search) => {
                let params = search_params(&item.params)?;
                let fetcher = TiktokFetcher::new(&self.config)?;
                let users = fetcher
                    .search_users(&params.query, params.count as usize)
                    .await?;
                Ok(apply_follows_filter(users, &params))
            }
        }
    }
}

fn similar_params(params: &serde_json::Value) -> Result<SimilarParams, FetchError> {
    serde_json::from_value(params.clone()).map_err(|e| FetchError::Config {
        message: format!("invalid similar params: {e}"),
    })
}

fn search_params(params: &serde_json::Value) -> Result<SearchParams, FetchError> {
    serde_json::from_value(params.clone()).map_err(|e| FetchError::Config {
        message: format!("invalid search params: {e}"),
    })
}

fn similar_request(params: &SimilarParams) -> SimilarRequest {
    SimilarRequest {
        username: params.username.clone(),
        uid: params.uid.clone(),
        count: params.count as usize,
        follows: params.follows,
        avg_views: params.avg_views,
    }
}

fn apply_follows_filter(users: Vec<UserRecord>, params: &SearchParams) -> Vec<UserRecord> {
    match &params.follows {
        None => users,
        Some(filter) => users
            .into_iter()
            .filter(|user| filter.contains(user.followers_count))
            .collect(),
    }
}
