//! Platform adapters wiring the fetch strategies into the aggregator.
//!
//! Each adapter implements [`SimilarSourceOps`] for one platform, mapping
//! the trait's uid-oriented calls onto whatever the platform actually
//! offers. Sources a platform cannot serve keep the default empty
//! implementations and the aggregator degrades gracefully.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::aggregator::SimilarSourceOps;
use crate::error::FetchError;
use crate::fetch::instagram::InstagramFetcher;
use crate::fetch::tiktok::TiktokFetcher;
use crate::fetch::twitter::TwitterFetcher;
use crate::fetch::{extract_hashtags, EngagementSample, UserRecord};

/// Dominant tags drawn from the subject's bio.
const MAX_SUBJECT_TAGS: usize = 5;

/// Tweets fetched per candidate for the average-views computation.
const ENGAGEMENT_PAGE_SIZE: usize = 20;

/// Reels fetched per candidate for the average-plays computation.
const REELS_FETCH_COUNT: usize = 15;

/// Twitter source operations.
pub struct TwitterOps {
    fetcher: TwitterFetcher,
}

impl TwitterOps {
    /// Wrap a Twitter strategy.
    pub fn new(fetcher: TwitterFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl SimilarSourceOps for TwitterOps {
    async fn resolve_uid(&self, username: &str) -> Result<String, FetchError> {
        self.fetcher.resolve_uid(username).await
    }

    async fn similar_users(&self, uid: &str) -> Result<Vec<UserRecord>, FetchError> {
        self.fetcher.similar_users(uid).await
    }

    async fn followings_page(&self, uid: &str, size: usize) -> Result<Vec<UserRecord>, FetchError> {
        self.fetcher.user_followings(uid, "", 1, size).await
    }

    async fn subject_tags(&self, username: &str, _uid: &str) -> Result<Vec<String>, FetchError> {
        let profile = self.fetcher.fetch_user_profile(username).await?;
        let mut tags = extract_hashtags(&profile.bio);
        tags.dedup();
        tags.truncate(MAX_SUBJECT_TAGS);
        Ok(tags)
    }

    async fn search_by_tag(&self, tag: &str, count: usize) -> Result<Vec<UserRecord>, FetchError> {
        self.fetcher.search_users(&format!("#{tag}"), count).await
    }

    async fn recent_engagement(
        &self,
        user: &UserRecord,
    ) -> Result<Vec<EngagementSample>, FetchError> {
        let tweets = self
            .fetcher
            .user_tweets(&user.uid, &user.username, 1, ENGAGEMENT_PAGE_SIZE)
            .await?;
        Ok(tweets.iter().map(EngagementSample::from).collect())
    }
}

/// Instagram source operations. Followings and tag search are not served.
pub struct InstagramOps {
    fetcher: InstagramFetcher,
}

impl InstagramOps {
    /// Wrap an Instagram strategy.
    pub fn new(fetcher: InstagramFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl SimilarSourceOps for InstagramOps {
    async fn resolve_uid(&self, username: &str) -> Result<String, FetchError> {
        self.fetcher.resolve_profile_id(username).await
    }

    async fn similar_users(&self, uid: &str) -> Result<Vec<UserRecord>, FetchError> {
        self.fetcher.similar_users(uid).await
    }

    async fn recent_engagement(
        &self,
        user: &UserRecord,
    ) -> Result<Vec<EngagementSample>, FetchError> {
        let reels = self.fetcher.user_reels(&user.uid, REELS_FETCH_COUNT).await?;
        Ok(reels.iter().map(EngagementSample::from).collect())
    }
}

/// TikTok source operations.
///
/// TikTok's similar and followings endpoints key on username / `sec_uid`
/// rather than uid, so the adapter keeps a uid map built from every record
/// that passes through it.
pub struct TiktokOps {
    fetcher: TiktokFetcher,
    usernames: Mutex<HashMap<String, String>>,
    sec_uids: Mutex<HashMap<String, String>>,
}

impl TiktokOps {
    /// Wrap a TikTok strategy.
    pub fn new(fetcher: TiktokFetcher) -> Self {
        Self {
            fetcher,
            usernames: Mutex::new(HashMap::new()),
            sec_uids: Mutex::new(HashMap::new()),
        }
    }

    async fn remember(&self, records: &[UserRecord]) {
        let mut usernames = self.usernames.lock().await;
        let mut sec_uids = self.sec_uids.lock().await;
        for record in records {
            if record.uid.is_empty() {
                continue;
            }
            usernames.insert(record.uid.clone(), record.username.clone());
            if let Some(sec_uid) = &record.sec_uid {
                sec_uids.insert(record.uid.clone(), sec_uid.clone());
            }
        }
    }

    async fn username_for(&self, uid: &str) -> Option<String> {
        self.usernames.lock().await.get(uid).cloned()
    }
}

#[async_trait::async_trait]
impl SimilarSourceOps for TiktokOps {
    async fn resolve_uid(&self, username: &str) -> Result<String, FetchError> {
        let profile = self.fetcher.fetch_user_profile(username).await?;
        if profile.uid.is_empty() {
            return Err(FetchError::NotFound {
                message: format!("no uid for @{username}"),
            });
        }
        let uid = profile.uid.clone();
        self.remember(std::slice::from_ref(&profile)).await;
        Ok(uid)
    }

    async fn similar_users(&self, uid: &str) -> Result<Vec<UserRecord>, FetchError> {
        let Some(username) = self.username_for(uid).await else {
            // Second-level parent outside the known map; skip quietly.
            return Ok(Vec::new());
        };
        let users = self.fetcher.similar_users(&username, 20).await?;
        self.remember(&users).await;
        Ok(users)
    }

    async fn followings_page(&self, uid: &str, size: usize) -> Result<Vec<UserRecord>, FetchError> {
        let Some(username) = self.username_for(uid).await else {
            return Ok(Vec::new());
        };
        let sec_uid = self.sec_uids.lock().await.get(uid).cloned();
        let users = self
            .fetcher
            .user_followings(&username, sec_uid.as_deref(), 1, size)
            .await?;
        self.remember(&users).await;
        Ok(users)
    }
}
