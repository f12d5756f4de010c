//! Shared fetch types and helpers.
//!
//! Platform-agnostic candidate records, engagement records, the candidate
//! source weights used by the aggregator, and the small text/timing helpers
//! every strategy shares.

pub mod http;
pub mod instagram;
pub mod tiktok;
pub mod twitter;

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::DelayRange;
use crate::task::Platform;

/// Which collection source produced a candidate. Ranking-internal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Direct similar-users call on the subject.
    FirstLevel,
    /// Similar-users fan-out over first-level candidates.
    SecondLevel,
    /// First page of the subject's followings.
    Followings,
    /// Hashtag search over the subject's dominant tags.
    TagSearch,
}

impl CandidateSource {
    /// Multiplicative weight applied to candidates from this source.
    pub fn weight(&self) -> f64 {
        match self {
            CandidateSource::FirstLevel => 1.0,
            CandidateSource::SecondLevel => 0.5,
            CandidateSource::Followings => 0.3,
            CandidateSource::TagSearch => 0.2,
        }
    }
}

/// A platform-agnostic candidate user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Platform the record came from.
    pub platform: Platform,
    /// Platform-scoped stable id.
    pub uid: String,
    /// Handle.
    pub username: String,
    /// Display name.
    pub nickname: String,
    /// Platform verification flag.
    pub is_verified: bool,
    /// Follower count.
    pub followers_count: u64,
    /// Following count.
    pub following_count: u64,
    /// Post / tweet / video count.
    pub post_count: u64,
    /// Profile bio.
    pub bio: String,
    /// First email-looking substring of the bio; empty if none.
    pub email_in_bio: String,
    /// Free-form location.
    pub location: String,
    /// Canonical profile URL.
    pub url: String,
    /// TikTok secondary id, needed for followings paging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sec_uid: Option<String>,
    /// TikTok account region; no other platform reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    /// Trimmed average of the 10 most recent non-pinned tweets' views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_views_last_10_tweets: Option<u64>,
    /// Trimmed average of the 10 most recent non-pinned reels' plays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_play_last_10_reels: Option<u64>,
    /// Collection source; ranking-internal, not serialized.
    #[serde(skip)]
    pub source: Option<CandidateSource>,
    /// Ranking score; ranking-internal, not serialized.
    #[serde(skip)]
    pub score: f64,
}

impl UserRecord {
    /// An empty record for `platform`; strategies fill in parsed fields.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            uid: String::new(),
            username: String::new(),
            nickname: String::new(),
            is_verified: false,
            followers_count: 0,
            following_count: 0,
            post_count: 0,
            bio: String::new(),
            email_in_bio: String::new(),
            location: String::new(),
            url: String::new(),
            sec_uid: None,
            country_code: None,
            avg_views_last_10_tweets: None,
            avg_play_last_10_reels: None,
            source: None,
            score: 0.0,
        }
    }

    /// The average-views value relevant for this record's platform.
    pub fn avg_recent_views(&self) -> Option<u64> {
        self.avg_views_last_10_tweets.or(self.avg_play_last_10_reels)
    }
}

/// A tweet, reduced to the fields the engine ranks on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tweet {
    /// Tweet id.
    pub id: String,
    /// Full text.
    pub text: String,
    /// Platform-formatted creation timestamp.
    pub created_at: String,
    /// Likes.
    pub favorite_count: u64,
    /// Retweets.
    pub retweet_count: u64,
    /// Replies.
    pub reply_count: u64,
    /// Quote tweets.
    pub quote_count: u64,
    /// View count.
    pub views_count: u64,
    /// Whether the tweet is pinned to the profile.
    #[serde(default)]
    pub is_pinned: bool,
    /// Canonical tweet URL.
    pub url: String,
}

/// A reel, reduced to the fields the engine ranks on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reel {
    /// Media id.
    pub id: String,
    /// URL shortcode.
    pub shortcode: String,
    /// Likes.
    pub like_count: u64,
    /// Comments.
    pub comment_count: u64,
    /// Plays.
    pub play_count: u64,
    /// Whether the reel is pinned to the profile grid.
    #[serde(default)]
    pub is_pinned: bool,
    /// Canonical reel URL.
    pub url: String,
}

/// One engagement observation used for average-views computation.
#[derive(Debug, Clone, Copy)]
pub struct EngagementSample {
    /// Views or plays.
    pub views: u64,
    /// Whether the item is pinned (excluded from the average).
    pub pinned: bool,
}

impl From<&Tweet> for EngagementSample {
    fn from(tweet: &Tweet) -> Self {
        Self {
            views: tweet.views_count,
            pinned: tweet.is_pinned,
        }
    }
}

impl From<&Reel> for EngagementSample {
    fn from(reel: &Reel) -> Self {
        Self {
            views: reel.play_count,
            pinned: reel.is_pinned,
        }
    }
}

/// Trimmed average views over the most recent items.
///
/// Takes up to 10 non-pinned items in publication order. With fewer than 3,
/// a plain arithmetic mean; otherwise one maximum and one minimum are
/// dropped and the remainder averaged. Rounded up to the nearest integer.
/// `None` when no non-pinned items were observed.
pub fn average_views(samples: &[EngagementSample]) -> Option<u64> {
    let mut views: Vec<u64> = samples
        .iter()
        .filter(|sample| !sample.pinned)
        .take(10)
        .map(|sample| sample.views)
        .collect();

    if views.is_empty() {
        return None;
    }

    if views.len() >= 3 {
        views.sort_unstable();
        views.pop();
        views.remove(0);
    }

    let total: u64 = views.iter().sum();
    let n = views.len() as u64;
    Some(total.div_ceil(n))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex")
    })
}

/// First email-looking substring of `text`, or empty.
pub fn extract_email(text: &str) -> String {
    email_regex()
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn hashtag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(\w+)").expect("hashtag regex"))
}

/// Hashtags mentioned in `text`, without the `#`, in order of appearance.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    hashtag_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Fixed pool of realistic browser user agents; one is chosen per request.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

/// Pick a user agent from the pool.
pub fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Sleep a uniformly random duration inside `range`. A zero range is a
/// no-op, which tests use to run at full speed.
pub async fn polite_delay(range: DelayRange) {
    if range.max_ms == 0 {
        return;
    }
    let ms = if range.min_ms >= range.max_ms {
        range.min_ms
    } else {
        rand::thread_rng().gen_range(range.min_ms..=range.max_ms)
    };
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
