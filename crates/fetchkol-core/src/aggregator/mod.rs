//! Similar-user aggregation, scoring, and filtering.
//!
//! Orchestrates multi-source candidate collection over a platform's
//! [`SimilarSourceOps`]: direct suggestions, a sequential second-degree
//! fan-out, a followings page, and an optional tag search. Candidates are
//! follower-filtered per source before union, deduplicated by uid keeping
//! the first-seen (highest-weight) source, scored, sorted, and admitted
//! against the average-views filter until the requested count is reached.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::AggregatorConfig;
use crate::error::FetchError;
use crate::fetch::{
    average_views, polite_delay, CandidateSource, EngagementSample, UserRecord,
};
use crate::task::{Platform, RangeFilter};

/// Platform operations the aggregator draws candidates from.
///
/// Sources a platform cannot serve keep the default empty implementations;
/// the aggregator degrades to the remaining sources.
#[async_trait::async_trait]
pub trait SimilarSourceOps: Send + Sync {
    /// Resolve a handle to its stable uid.
    async fn resolve_uid(&self, username: &str) -> Result<String, FetchError>;

    /// One similar-users call for `uid`.
    async fn similar_users(&self, uid: &str) -> Result<Vec<UserRecord>, FetchError>;

    /// First page of the subject's followings.
    async fn followings_page(&self, _uid: &str, _size: usize) -> Result<Vec<UserRecord>, FetchError> {
        Ok(Vec::new())
    }

    /// Dominant hashtags of the subject, seeding the tag-search source.
    async fn subject_tags(&self, _username: &str, _uid: &str) -> Result<Vec<String>, FetchError> {
        Ok(Vec::new())
    }

    /// Hashtag-based user search.
    async fn search_by_tag(&self, _tag: &str, _count: usize) -> Result<Vec<UserRecord>, FetchError> {
        Ok(Vec::new())
    }

    /// One page of the candidate's most recent posts, for average views.
    async fn recent_engagement(
        &self,
        _user: &UserRecord,
    ) -> Result<Vec<EngagementSample>, FetchError> {
        Ok(Vec::new())
    }
}

/// Scoring hooks. The engine ships zero defaults; a future implementation
/// can populate them without touching the aggregator.
pub trait SignalProvider: Send + Sync {
    /// Similarity of the candidate's content to the subject's.
    fn content_similarity(&self, _candidate: &UserRecord) -> f64 {
        0.0
    }

    /// Similarity of the candidate's bio to the subject's.
    fn bio_similarity(&self, _candidate: &UserRecord) -> f64 {
        0.0
    }

    /// Posting-activity signal of the candidate.
    fn activity(&self, _candidate: &UserRecord) -> f64 {
        0.0
    }
}

/// The default all-zero signal provider.
pub struct ZeroSignals;

impl SignalProvider for ZeroSignals {}

/// Signal coefficients in the scoring formula.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    /// Coefficient of content similarity.
    pub content: f64,
    /// Coefficient of bio similarity.
    pub bio: f64,
    /// Coefficient of activity.
    pub activity: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            content: 0.4,
            bio: 0.2,
            activity: 0.2,
        }
    }
}

/// One similar-users aggregation request.
#[derive(Debug, Clone)]
pub struct SimilarRequest {
    /// Subject handle.
    pub username: String,
    /// Subject uid, resolved when absent.
    pub uid: Option<String>,
    /// Output size cap.
    pub count: usize,
    /// Follower-count filter, applied per source before union.
    pub follows: Option<RangeFilter>,
    /// Average-views filter, applied at admission.
    pub avg_views: Option<RangeFilter>,
}

/// Multi-source similar-user aggregator.
pub struct SimilarUserAggregator {
    ops: Arc<dyn SimilarSourceOps>,
    signals: Arc<dyn SignalProvider>,
    config: AggregatorConfig,
    weights: ScoreWeights,
}

impl SimilarUserAggregator {
    /// Build an aggregator with the default zero signal hooks.
    pub fn new(ops: Arc<dyn SimilarSourceOps>, config: AggregatorConfig) -> Self {
        Self::with_signals(ops, Arc::new(ZeroSignals), config)
    }

    /// Build an aggregator with custom signal hooks.
    pub fn with_signals(
        ops: Arc<dyn SimilarSourceOps>,
        signals: Arc<dyn SignalProvider>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            ops,
            signals,
            config,
            weights: ScoreWeights::default(),
        }
    }

    /// Run the full collect → filter → dedup → score → admit pipeline.
    pub async fn run(&self, request: &SimilarRequest) -> Result<Vec<UserRecord>, FetchError> {
        let uid = match &request.uid {
            Some(uid) if !uid.is_empty() => uid.clone(),
            _ => self.ops.resolve_uid(&request.username).await?,
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<UserRecord> = Vec::new();
        let mut last_error: Option<FetchError> = None;

        // First-level suggestions. The raw list also seeds the fan-out, so
        // keep it before filtering.
        let first_level = match self.ops.similar_users(&uid).await {
            Ok(users) => users,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(username = %request.username, error = %e, "first-level source failed");
                last_error = Some(e);
                Vec::new()
            }
        };
        tracing::info!(
            username = %request.username,
            first_level = first_level.len(),
            "collected first-level candidates"
        );
        admit_source(
            first_level.clone(),
            CandidateSource::FirstLevel,
            request.follows.as_ref(),
            &mut seen,
            &mut candidates,
        );

        // Second-degree fan-out, sequential with jitter between siblings to
        // stay under per-credential RPS.
        if candidates.len() < request.count {
            let parents: Vec<&UserRecord> = first_level
                .iter()
                .take(self.config.second_level_parents)
                .filter(|parent| !parent.uid.is_empty())
                .collect();
            for parent in parents {
                match self.ops.similar_users(&parent.uid).await {
                    Ok(users) => {
                        tracing::info!(
                            parent = %parent.username,
                            found = users.len(),
                            "collected second-level candidates"
                        );
                        admit_source(
                            users,
                            CandidateSource::SecondLevel,
                            request.follows.as_ref(),
                            &mut seen,
                            &mut candidates,
                        );
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(parent = %parent.username, error = %e, "second-level call failed");
                        last_error = Some(e);
                    }
                }
                polite_delay(self.config.sibling_delay).await;
            }
        }

        // Followings page.
        if candidates.len() < request.count {
            match self
                .ops
                .followings_page(&uid, self.config.followings_page_size)
                .await
            {
                Ok(users) => {
                    admit_source(
                        users,
                        CandidateSource::Followings,
                        request.follows.as_ref(),
                        &mut seen,
                        &mut candidates,
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "followings source failed");
                    last_error = Some(e);
                }
            }
        }

        // Optional tag search over the subject's dominant tags.
        if candidates.len() < request.count {
            let tags = self
                .ops
                .subject_tags(&request.username, &uid)
                .await
                .unwrap_or_default();
            for tag in tags {
                match self.ops.search_by_tag(&tag, request.count).await {
                    Ok(users) => {
                        admit_source(
                            users,
                            CandidateSource::TagSearch,
                            request.follows.as_ref(),
                            &mut seen,
                            &mut candidates,
                        );
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(tag, error = %e, "tag search failed");
                        last_error = Some(e);
                    }
                }
                if candidates.len() >= request.count {
                    break;
                }
            }
        }

        if candidates.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
            return Ok(Vec::new());
        }

        // Score and rank. The sort is stable, so equal scores keep the
        // defined collection order.
        for candidate in &mut candidates {
            candidate.score = self.score(candidate);
        }
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Admission: enrich with average views and apply the filter.
        let mut output = Vec::with_capacity(request.count);
        for mut candidate in candidates {
            if output.len() >= request.count {
                break;
            }
            let avg = match self.ops.recent_engagement(&candidate).await {
                Ok(samples) => average_views(&samples),
                Err(e) => {
                    tracing::warn!(username = %candidate.username, error = %e, "engagement fetch failed");
                    None
                }
            };
            set_average(&mut candidate, avg);

            let admitted = match &request.avg_views {
                None => true,
                Some(filter) => avg.is_some_and(|value| filter.contains(value)),
            };
            if admitted {
                output.push(candidate);
            }
        }

        Ok(output)
    }

    fn score(&self, candidate: &UserRecord) -> f64 {
        let weight = candidate.source.map_or(0.0, |source| source.weight());
        weight
            * (self.weights.content * self.signals.content_similarity(candidate)
                + self.weights.bio * self.signals.bio_similarity(candidate)
                + self.weights.activity * self.signals.activity(candidate))
    }
}

/// Filter one source list, tag it, and union it into the candidate set.
/// Dedup keeps the first-seen record, which carries the highest source
/// weight because sources are collected in weight order.
fn admit_source(
    users: Vec<UserRecord>,
    source: CandidateSource,
    follows: Option<&RangeFilter>,
    seen: &mut HashSet<String>,
    candidates: &mut Vec<UserRecord>,
) {
    for mut user in users {
        if user.uid.is_empty() {
            continue;
        }
        if let Some(filter) = follows {
            if !filter.contains(user.followers_count) {
                continue;
            }
        }
        if !seen.insert(user.uid.clone()) {
            continue;
        }
        user.source = Some(source);
        candidates.push(user);
    }
}

/// Store the computed average under the platform's field name.
fn set_average(user: &mut UserRecord, avg: Option<u64>) {
    match user.platform {
        Platform::Twitter => user.avg_views_last_10_tweets = avg,
        Platform::Instagram => user.avg_play_last_10_reels = avg,
        Platform::Tiktok => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayRange;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn user(uid: &str, followers: u64) -> UserRecord {
        let mut record = UserRecord::new(Platform::Twitter);
        record.uid = uid.to_string();
        record.username = format!("user{uid}");
        record.followers_count = followers;
        record
    }

    fn fast_config() -> AggregatorConfig {
        AggregatorConfig {
            second_level_parents: 20,
            followings_page_size: 70,
            page_delay: DelayRange::zero(),
            sibling_delay: DelayRange::zero(),
        }
    }

    fn request(count: usize) -> SimilarRequest {
        SimilarRequest {
            username: "jack".to_string(),
            uid: Some("42".to_string()),
            count,
            follows: None,
            avg_views: None,
        }
    }

    /// Scripted ops: per-uid similar lists, per-uid engagement, call log.
    #[derive(Default)]
    struct MockOps {
        similar: HashMap<String, Vec<UserRecord>>,
        followings: Vec<UserRecord>,
        engagement: HashMap<String, Vec<u64>>,
        engagement_errors: bool,
        similar_calls: Mutex<Vec<String>>,
        engagement_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SimilarSourceOps for MockOps {
        async fn resolve_uid(&self, _username: &str) -> Result<String, FetchError> {
            Ok("42".to_string())
        }

        async fn similar_users(&self, uid: &str) -> Result<Vec<UserRecord>, FetchError> {
            self.similar_calls.lock().expect("lock").push(uid.to_string());
            match self.similar.get(uid) {
                Some(users) => Ok(users.clone()),
                None => Ok(Vec::new()),
            }
        }

        async fn followings_page(
            &self,
            _uid: &str,
            _size: usize,
        ) -> Result<Vec<UserRecord>, FetchError> {
            Ok(self.followings.clone())
        }

        async fn recent_engagement(
            &self,
            user: &UserRecord,
        ) -> Result<Vec<EngagementSample>, FetchError> {
            self.engagement_calls.fetch_add(1, Ordering::SeqCst);
            if self.engagement_errors {
                return Err(FetchError::Transient {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(self
                .engagement
                .get(&user.uid)
                .map(|views| {
                    views
                        .iter()
                        .map(|&v| EngagementSample {
                            views: v,
                            pinned: false,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    struct ConstantSignals(f64);

    impl SignalProvider for ConstantSignals {
        fn content_similarity(&self, _c: &UserRecord) -> f64 {
            self.0
        }
        fn bio_similarity(&self, _c: &UserRecord) -> f64 {
            self.0
        }
        fn activity(&self, _c: &UserRecord) -> f64 {
            self.0
        }
    }

    #[tokio::test]
    async fn first_level_fills_count() {
        let mut ops = MockOps::default();
        ops.similar.insert(
            "42".to_string(),
            vec![
                user("1", 10),
                user("2", 20),
                user("3", 30),
                user("4", 40),
                user("5", 50),
            ],
        );
        let aggregator = SimilarUserAggregator::new(Arc::new(ops), fast_config());

        let result = aggregator.run(&request(5)).await.expect("run");
        assert_eq!(result.len(), 5);
        assert!(result.iter().all(|u| u.source == Some(CandidateSource::FirstLevel)));
        // Zero signals: stable sort preserves collection order.
        let uids: Vec<&str> = result.iter().map(|u| u.uid.as_str()).collect();
        assert_eq!(uids, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn second_level_scaled_and_deduped() {
        let mut ops = MockOps::default();
        ops.similar
            .insert("42".to_string(), vec![user("p1", 100)]);
        // The parent's own suggestions include a duplicate of the parent.
        ops.similar.insert(
            "p1".to_string(),
            vec![user("p1", 100), user("s1", 200), user("s2", 300)],
        );
        let aggregator = SimilarUserAggregator::with_signals(
            Arc::new(ops),
            Arc::new(ConstantSignals(1.0)),
            fast_config(),
        );

        let result = aggregator.run(&request(5)).await.expect("run");
        assert_eq!(result.len(), 3);
        // Parent keeps its first-level weight: 1.0 * (0.4 + 0.2 + 0.2).
        assert_eq!(result[0].uid, "p1");
        assert!((result[0].score - 0.8).abs() < 1e-9);
        // Second-level candidates score at half weight.
        assert_eq!(result[1].source, Some(CandidateSource::SecondLevel));
        assert!((result[1].score - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fan_out_respects_parent_cap_and_is_sequential() {
        let mut ops = MockOps::default();
        let parents: Vec<UserRecord> = (0..30).map(|i| user(&format!("p{i}"), 10)).collect();
        ops.similar.insert("42".to_string(), parents);
        let ops = Arc::new(ops);
        let config = AggregatorConfig {
            second_level_parents: 20,
            ..fast_config()
        };
        let aggregator = SimilarUserAggregator::new(ops.clone(), config);

        // count larger than first level so the fan-out runs.
        let result = aggregator.run(&request(100)).await.expect("run");
        assert_eq!(result.len(), 30);

        let calls = ops.similar_calls.lock().expect("lock").clone();
        // Subject + exactly 20 parents, in first-level order.
        assert_eq!(calls.len(), 21);
        assert_eq!(calls[0], "42");
        assert_eq!(calls[1], "p0");
        assert_eq!(calls[20], "p19");
    }

    #[tokio::test]
    async fn follows_filter_applies_before_union() {
        let mut ops = MockOps::default();
        ops.similar.insert(
            "42".to_string(),
            vec![user("1", 500), user("2", 1500), user("3", 2500), user("4", 3500)],
        );
        let aggregator = SimilarUserAggregator::new(Arc::new(ops), fast_config());

        let mut req = request(3);
        req.follows = Some(RangeFilter {
            min: Some(1000),
            max: None,
        });
        let result = aggregator.run(&req).await.expect("run");
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|u| u.followers_count >= 1000));
    }

    #[tokio::test]
    async fn avg_views_filter_rejects_all_is_completed_empty() {
        let mut ops = MockOps::default();
        ops.similar
            .insert("42".to_string(), vec![user("1", 10), user("2", 20)]);
        ops.engagement.insert("1".to_string(), vec![5, 5]);
        ops.engagement.insert("2".to_string(), vec![7, 7]);
        let aggregator = SimilarUserAggregator::new(Arc::new(ops), fast_config());

        let mut req = request(2);
        req.avg_views = Some(RangeFilter {
            min: Some(1000),
            max: None,
        });
        let result = aggregator.run(&req).await.expect("run");
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn null_average_admitted_only_without_filter() {
        let mut ops = MockOps::default();
        ops.similar.insert("42".to_string(), vec![user("1", 10)]);
        ops.engagement_errors = true;
        let aggregator = SimilarUserAggregator::new(Arc::new(ops), fast_config());

        let result = aggregator.run(&request(1)).await.expect("run");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].avg_views_last_10_tweets, None);

        let mut ops = MockOps::default();
        ops.similar.insert("42".to_string(), vec![user("1", 10)]);
        ops.engagement_errors = true;
        let aggregator = SimilarUserAggregator::new(Arc::new(ops), fast_config());
        let mut req = request(1);
        req.avg_views = Some(RangeFilter {
            min: Some(0),
            max: None,
        });
        let result = aggregator.run(&req).await.expect("run");
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn average_enriches_admitted_records() {
        let mut ops = MockOps::default();
        ops.similar.insert("42".to_string(), vec![user("1", 10)]);
        ops.engagement
            .insert("1".to_string(), vec![1, 10, 20, 30, 100]);
        let aggregator = SimilarUserAggregator::new(Arc::new(ops), fast_config());

        let result = aggregator.run(&request(1)).await.expect("run");
        assert_eq!(result[0].avg_views_last_10_tweets, Some(20));
    }

    #[tokio::test]
    async fn followings_source_backfills() {
        let mut ops = MockOps::default();
        ops.similar.insert("42".to_string(), vec![user("1", 10)]);
        ops.followings = vec![user("1", 10), user("f1", 20), user("f2", 30)];
        let aggregator = SimilarUserAggregator::new(Arc::new(ops), fast_config());

        let result = aggregator.run(&request(3)).await.expect("run");
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].source, Some(CandidateSource::FirstLevel));
        assert_eq!(result[1].source, Some(CandidateSource::Followings));
        assert_eq!(result[1].uid, "f1");
    }

    #[tokio::test]
    async fn admission_stops_at_count() {
        let mut ops = MockOps::default();
        ops.similar.insert(
            "42".to_string(),
            (0..10).map(|i| user(&format!("{i}"), 10)).collect(),
        );
        let ops = Arc::new(ops);
        let aggregator = SimilarUserAggregator::new(ops.clone(), fast_config());

        let result = aggregator.run(&request(4)).await.expect("run");
        assert_eq!(result.len(), 4);
        // Engagement is only fetched until the output fills.
        assert_eq!(ops.engagement_calls.load(Ordering::SeqCst), 4);
    }

    struct FailingOps;

    #[async_trait::async_trait]
    impl SimilarSourceOps for FailingOps {
        async fn resolve_uid(&self, _username: &str) -> Result<String, FetchError> {
            Ok("42".to_string())
        }
        async fn similar_users(&self, _uid: &str) -> Result<Vec<UserRecord>, FetchError> {
            Err(FetchError::Transient {
                status: 503,
                message: "upstream down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn all_sources_failed_propagates_last_error() {
        let aggregator = SimilarUserAggregator::new(Arc::new(FailingOps), fast_config());
        let err = aggregator.run(&request(5)).await.expect_err("err");
        assert!(matches!(err, FetchError::Transient { status: 503, .. }));
    }

    struct FatalOps;

    #[async_trait::async_trait]
    impl SimilarSourceOps for FatalOps {
        async fn resolve_uid(&self, _username: &str) -> Result<String, FetchError> {
            Ok("42".to_string())
        }
        async fn similar_users(&self, _uid: &str) -> Result<Vec<UserRecord>, FetchError> {
            Err(FetchError::Config {
                message: "similar_users endpoint missing".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn config_error_short_circuits() {
        let aggregator = SimilarUserAggregator::new(Arc::new(FatalOps), fast_config());
        let err = aggregator.run(&request(5)).await.expect_err("err");
        assert!(err.is_fatal());
    }
}
