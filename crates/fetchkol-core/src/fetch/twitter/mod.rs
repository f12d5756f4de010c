//! Twitter fetch strategy.
//!
//! Talks to the credentialled GraphQL surface the web client uses: every
//! operation is a GET with URL-encoded `variables` and `features` JSON
//! blobs, authenticated by the leased credential's header bundle, with a
//! rotating user agent. Tweet and followings retrieval is channel-switchable
//! (see [`channels`]).

pub mod channels;
pub mod envelope;
pub mod params;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{Config, DelayRange};
use crate::credentials::pool::CredentialPool;
use crate::credentials::{AccountType, Credential};
use crate::error::FetchError;
use crate::fetch::{http, polite_delay, random_user_agent, Tweet, UserRecord};
use crate::ratelimit::RateLimitStore;

use channels::TweetChannel;

/// Pages of zero new users tolerated before a paged search stops.
const MAX_STALE_PAGES: u32 = 3;

/// Issue one GraphQL GET and map the outcome through the credential
/// lifecycle: a 429 strikes the credential, any other response resets its
/// strike counter.
pub(crate) async fn graphql_get(
    client: &reqwest::Client,
    pool: &CredentialPool,
    credential: &Credential,
    endpoint: &str,
    variables: Value,
    features: Value,
    extra_headers: &[(&str, String)],
) -> Result<Value, FetchError> {
    if endpoint.is_empty() {
        return Err(FetchError::Config {
            message: "twitter endpoint is not configured".to_string(),
        });
    }

    let mut request = client
        .get(endpoint)
        .query(&[
            ("variables", variables.to_string()),
            ("features", features.to_string()),
        ])
        .header("authorization", credential.header("authorization"))
        .header("x-csrf-token", credential.header("x-csrf-token"))
        .header("cookie", credential.header("cookie"))
        .header("user-agent", random_user_agent())
        .header("content-type", "application/json")
        .header("x-twitter-active-user", "yes")
        .header("x-twitter-client-language", "en");
    for (name, value) in extra_headers {
        request = request.header(*name, value);
    }

    let response = request.send().await.map_err(http::transport_error)?;
    match http::read_json(response).await {
        Ok(root) => {
            pool.record_success(credential.id).await;
            Ok(root)
        }
        Err(FetchError::RateLimited) => {
            pool.record_rate_limited(credential.id).await;
            Err(FetchError::RateLimited)
        }
        Err(other) => {
            pool.record_success(credential.id).await;
            Err(other)
        }
    }
}

/// Twitter strategy over a per-task credential pool.
pub struct TwitterFetcher {
    client: reqwest::Client,
    config: Config,
    pool: Arc<CredentialPool>,
    channel: Arc<dyn TweetChannel>,
    page_delay: DelayRange,
}

impl TwitterFetcher {
    /// Build the strategy, including the configured tweet channel.
    pub fn new(
        config: &Config,
        pool: Arc<CredentialPool>,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, FetchError> {
        let channel = channels::make_tweet_channel(config, pool.clone(), store)?;
        Ok(Self {
            client: http::build_client(config.proxy.active_url())?,
            config: config.clone(),
            pool,
            channel,
            page_delay: config.aggregator.page_delay,
        })
    }

    /// Fetch the subject's profile by handle.
    pub async fn fetch_user_profile(&self, username: &str) -> Result<UserRecord, FetchError> {
        let credential = self.pool.main().await?;
        let root = graphql_get(
            &self.client,
            &self.pool,
            &credential,
            &self.config.twitter.endpoints.user_by_screen_name,
            params::profile_variables(username),
            params::profile_features(),
            &[],
        )
        .await?;

        envelope::parse_profile(&root).ok_or_else(|| FetchError::NotFound {
            message: format!("no profile for @{username}"),
        })
    }

    /// Resolve a handle to its stable uid.
    pub async fn resolve_uid(&self, username: &str) -> Result<String, FetchError> {
        let profile = self.fetch_user_profile(username).await?;
        if profile.uid.is_empty() {
            return Err(FetchError::NotFound {
                message: format!("no uid for @{username}"),
            });
        }
        Ok(profile.uid)
    }

    /// One similar-users call for `uid`, served by the main credential.
    pub async fn similar_users(&self, uid: &str) -> Result<Vec<UserRecord>, FetchError> {
        let credential = self.pool.main().await?;
        let root = graphql_get(
            &self.client,
            &self.pool,
            &credential,
            &self.config.twitter.endpoints.similar_users,
            params::similar_variables(uid),
            params::timeline_features(),
            &[],
        )
        .await?;
        Ok(envelope::parse_similar_users(&root))
    }

    /// Paged user search, deduplicated by uid.
    ///
    /// Stops when `count` is reached, the cursor runs out, or three
    /// consecutive pages yield no new users. A page failure after any users
    /// were collected returns the partial list.
    pub async fn search_users(
        &self,
        query: &str,
        count: usize,
    ) -> Result<Vec<UserRecord>, FetchError> {
        let mut all_users: Vec<UserRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut stale_pages = 0u32;

        while all_users.len() < count {
            let credential = self.pool.next_available(AccountType::Normal).await?;
            let transaction_id = credential.header("x-client-transaction-id").to_string();
            let extra: Vec<(&str, String)> = if transaction_id.is_empty() {
                Vec::new()
            } else {
                vec![("x-client-transaction-id", transaction_id)]
            };

            let outcome = graphql_get(
                &self.client,
                &self.pool,
                &credential,
                &self.config.twitter.endpoints.search_timeline,
                params::search_variables(query, cursor.as_deref()),
                params::timeline_features(),
                &extra,
            )
            .await;

            let root = match outcome {
                Ok(root) => root,
                Err(e) if !all_users.is_empty() && !e.is_fatal() => {
                    tracing::warn!(query, error = %e, "search page failed, returning partial");
                    break;
                }
                Err(e) => return Err(e),
            };

            let (users, next_cursor) = envelope::parse_search_users(&root);
            let before = seen.len();
            for user in users {
                if !user.uid.is_empty() && seen.insert(user.uid.clone()) {
                    all_users.push(user);
                }
            }

            if seen.len() == before {
                stale_pages += 1;
            } else {
                stale_pages = 0;
            }

            tracing::info!(query, collected = seen.len(), target = count, "search progress");

            cursor = next_cursor;
            if cursor.is_none() || all_users.len() >= count {
                break;
            }
            if stale_pages >= MAX_STALE_PAGES {
                tracing::info!(query, "three pages without new users, stopping search");
                break;
            }

            polite_delay(self.page_delay).await;
        }

        all_users.truncate(count);
        Ok(all_users)
    }

    /// Recent tweets through the configured channel.
    pub async fn user_tweets(
        &self,
        uid: &str,
        username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<Tweet>, FetchError> {
        self.channel.fetch_user_tweets(uid, username, pages, size).await
    }

    /// Followings through the configured channel.
    pub async fn user_followings(
        &self,
        uid: &str,
        username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<UserRecord>, FetchError> {
        self.channel
            .fetch_user_followings(uid, username, pages, size)
            .await
    }
}
