//! Fetch intake endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use fetchkol_core::coordinator::Submission;
use fetchkol_core::task::{Platform, RangeFilter, SearchParams, SimilarParams};

use crate::error::ApiError;
use crate::state::AppState;

fn default_similar_count() -> u32 {
    50
}

fn default_search_count() -> u32 {
    20
}

/// Body of `POST /fetch/similar`.
#[derive(Debug, Deserialize)]
pub struct SimilarBody {
    /// Target platform name.
    pub platform: String,
    /// Subject username.
    pub username: String,
    /// Subject uid, if known.
    #[serde(default)]
    pub uid: Option<String>,
    /// How many candidates to return (1..=100).
    #[serde(default = "default_similar_count")]
    pub count: u32,
    /// Follower-count filter.
    #[serde(default)]
    pub follows: Option<RangeFilter>,
    /// Average-views filter.
    #[serde(default)]
    pub avg_views: Option<RangeFilter>,
}

/// Body of `POST /fetch/search`.
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    /// Target platform name.
    pub platform: String,
    /// Search query.
    pub query: String,
    /// How many users to return (1..=100).
    #[serde(default = "default_search_count")]
    pub count: u32,
    /// Follower-count filter.
    #[serde(default)]
    pub follows: Option<RangeFilter>,
}

/// `POST /fetch/similar` — create a pending similar-users task.
pub async fn similar(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SimilarBody>,
) -> Result<Json<Submission>, ApiError> {
    let platform = Platform::parse(&body.platform).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let params = SimilarParams {
        username: body.username,
        uid: body.uid,
        count: body.count,
        follows: body.follows,
        avg_views: body.avg_views,
    };
    let submission = state.coordinator.submit_similar(platform, params).await?;
    Ok(Json(submission))
}

/// `POST /fetch/search` — create a pending user-search task.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Submission>, ApiError> {
    let platform = Platform::parse(&body.platform).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let params = SearchParams {
        query: body.query,
        count: body.count,
        follows: body.follows,
    };
    let submission = state.coordinator.submit_search(platform, params).await?;
    Ok(Json(submission))
}
