//! Task identity and request parameter types.
//!
//! A fetch task is named by a deterministic 32-hex digest of its submission
//! millisecond, platform, and action, so identical requests landing in the
//! same millisecond collapse to one task id.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Supported platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Twitter / X.
    Twitter,
    /// Instagram.
    Instagram,
    /// TikTok.
    Tiktok,
}

impl Platform {
    /// The wire name of this platform.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
        }
    }

    /// Parse a wire name, rejecting unknown platforms.
    pub fn parse(name: &str) -> Result<Self, TaskError> {
        match name {
            "twitter" => Ok(Platform::Twitter),
            "instagram" => Ok(Platform::Instagram),
            "tiktok" => Ok(Platform::Tiktok),
            other => Err(TaskError::UnknownPlatform {
                name: other.to_string(),
            }),
        }
    }

    /// Canonical profile URL for a username on this platform.
    pub fn profile_url(&self, username: &str) -> String {
        match self {
            Platform::Twitter => format!("https://x.com/{username}"),
            Platform::Instagram => format!("https://www.instagram.com/{username}"),
            Platform::Tiktok => format!("https://www.tiktok.com/@{username}"),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported fetch actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Find users similar to a subject user.
    Similar,
    /// Search users by query.
    Search,
}

impl Action {
    /// The wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Similar => "similar",
            Action::Search => "search",
        }
    }

    /// Parse a wire name, rejecting unknown actions.
    pub fn parse(name: &str) -> Result<Self, TaskError> {
        match name {
            "similar" => Ok(Action::Similar),
            "search" => Ok(Action::Search),
            other => Err(TaskError::UnknownAction {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a fetch task.
///
/// `Running` is an in-memory transient: the durable task log only ever holds
/// `Pending`, `Completed`, or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted and enqueued, not yet picked up.
    Pending,
    /// Being processed by a worker.
    Running,
    /// Finished with a result list.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// The wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether a transition from `self` to `next` is legal.
    /// Backward transitions are forbidden.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Completed)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

/// Derive the deterministic task id for a submission.
///
/// 32-char lowercase hex of `md5("{timestamp_ms}_{platform}_{action}")`.
pub fn derive_task_id(timestamp_ms: u64, platform: Platform, action: Action) -> String {
    let input = format!("{timestamp_ms}_{platform}_{action}");
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// An inclusive numeric range filter with optional bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFilter {
    /// Inclusive lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Inclusive upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl RangeFilter {
    /// Reject negative bounds.
    pub fn validate(&self) -> Result<(), TaskError> {
        for bound in [self.min, self.max].into_iter().flatten() {
            if bound < 0 {
                return Err(TaskError::NegativeFollowerBound { value: bound });
            }
        }
        Ok(())
    }

    /// Whether `value` falls within the filter.
    pub fn contains(&self, value: u64) -> bool {
        if let Some(min) = self.min {
            if value < min as u64 {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max as u64 {
                return false;
            }
        }
        true
    }
}

fn default_similar_count() -> u32 {
    50
}

fn default_search_count() -> u32 {
    20
}

/// Parameters of a `similar` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarParams {
    /// Subject username.
    pub username: String,
    /// Subject uid, if the caller already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// How many candidates to return (1..=100).
    #[serde(default = "default_similar_count")]
    pub count: u32,
    /// Follower-count filter applied before union.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follows: Option<RangeFilter>,
    /// Average-views filter applied at admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_views: Option<RangeFilter>,
}

/// Parameters of a `search` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Search query. A leading `#` switches to hashtag search.
    pub query: String,
    /// How many users to return (1..=100).
    #[serde(default = "default_search_count")]
    pub count: u32,
    /// Follower-count filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follows: Option<RangeFilter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_is_32_hex() {
        let id = derive_task_id(1_700_000_000_123, Platform::Twitter, Action::Similar);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn task_id_deterministic_within_same_millisecond() {
        let a = derive_task_id(42, Platform::Twitter, Action::Similar);
        let b = derive_task_id(42, Platform::Twitter, Action::Similar);
        assert_eq!(a, b);
    }

    #[test]
    fn task_id_differs_across_milliseconds() {
        let a = derive_task_id(42, Platform::Twitter, Action::Similar);
        let b = derive_task_id(47, Platform::Twitter, Action::Similar);
        assert_ne!(a, b);
    }

    #[test]
    fn task_id_differs_across_platform_and_action() {
        let a = derive_task_id(42, Platform::Twitter, Action::Similar);
        let b = derive_task_id(42, Platform::Instagram, Action::Similar);
        let c = derive_task_id(42, Platform::Twitter, Action::Search);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn platform_parse_round_trips() {
        for name in ["twitter", "instagram", "tiktok"] {
            assert_eq!(Platform::parse(name).unwrap().as_str(), name);
        }
        assert!(Platform::parse("youtube").is_err());
    }

    #[test]
    fn profile_urls_per_platform() {
        assert_eq!(
            Platform::Twitter.profile_url("jack"),
            "https://x.com/jack"
        );
        assert_eq!(
            Platform::Instagram.profile_url("jack"),
            "https://www.instagram.com/jack"
        );
        assert_eq!(
            Platform::Tiktok.profile_url("jack"),
            "https://www.tiktok.com/@jack"
        );
    }

    #[test]
    fn status_transitions_forbid_backward() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn range_filter_bounds() {
        let filter = RangeFilter {
            min: Some(1000),
            max: Some(5000),
        };
        assert!(!filter.contains(999));
        assert!(filter.contains(1000));
        assert!(filter.contains(5000));
        assert!(!filter.contains(5001));

        let open = RangeFilter::default();
        assert!(open.contains(0));
        assert!(open.contains(u64::MAX));
    }

    #[test]
    fn range_filter_rejects_negative_bounds() {
        let filter = RangeFilter {
            min: Some(-1),
            max: None,
        };
        assert!(filter.validate().is_err());
        let zero = RangeFilter {
            min: Some(0),
            max: None,
        };
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn similar_params_defaults() {
        let params: SimilarParams =
            serde_json::from_str(r#"{"username": "jack"}"#).expect("parse");
        assert_eq!(params.count, 50);
        assert!(params.uid.is_none());
        assert!(params.follows.is_none());
    }

    #[test]
    fn search_params_defaults() {
        let params: SearchParams = serde_json::from_str(r#"{"query": "rust"}"#).expect("parse");
        assert_eq!(params.count, 20);
    }
}
