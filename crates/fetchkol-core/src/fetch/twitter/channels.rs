//! Channel-switchable tweet and followings retrieval.
//!
//! The same logical operations can be served by the in-band credentialled
//! GraphQL endpoint or by a third-party RapidAPI-style endpoint. A channel
//! is picked by name through [`make_tweet_channel`]; new channels extend the
//! factory match. Every channel owns its own `twitter:<channel>` rate-limit
//! bucket.

use std::sync::Arc;

use serde_json::Value;

use super::{envelope, graphql_get, params};
use crate::config::{ChannelConfig, Config, DelayRange, TwitterEndpoints};
use crate::credentials::pool::CredentialPool;
use crate::credentials::AccountType;
use crate::error::FetchError;
use crate::fetch::{http, polite_delay, Tweet, UserRecord};
use crate::ratelimit::{DistributedRateLimiter, RateLimitStore};

/// A named upstream transport for tweet and followings retrieval.
#[async_trait::async_trait]
pub trait TweetChannel: Send + Sync {
    /// Fetch up to `pages` pages of `size` recent tweets.
    async fn fetch_user_tweets(
        &self,
        uid: &str,
        username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<Tweet>, FetchError>;

    /// Fetch up to `pages` pages of `size` followings.
    async fn fetch_user_followings(
        &self,
        uid: &str,
        username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<UserRecord>, FetchError>;
}

/// Build the configured tweet channel.
pub fn make_tweet_channel(
    config: &Config,
    pool: Arc<CredentialPool>,
    store: Arc<dyn RateLimitStore>,
) -> Result<Arc<dyn TweetChannel>, FetchError> {
    let name = config.twitter.tweet_channel.as_str();
    let rate = config
        .twitter
        .channels
        .get(name)
        .map_or(1.0, |c| c.rate_per_sec);
    let limiter = DistributedRateLimiter::new(store, Config::channel_bucket_key(name), rate);
    let client = http::build_client(config.proxy.active_url())?;

    match name {
        "graphql" => Ok(Arc::new(GraphqlChannel {
            client,
            endpoints: config.twitter.endpoints.clone(),
            pool,
            limiter,
            page_delay: config.aggregator.page_delay,
        })),
        "rapid" => {
            let channel = config
                .twitter
                .channels
                .get("rapid")
                .cloned()
                .ok_or_else(|| FetchError::Config {
                    message: "twitter.channels.rapid is not configured".to_string(),
                })?;
            Ok(Arc::new(RapidChannel {
                client,
                channel,
                limiter,
                page_delay: config.aggregator.page_delay,
            }))
        }
        other => Err(FetchError::Config {
            message: format!("unknown tweet channel '{other}'"),
        }),
    }
}

/// In-band credentialled GraphQL channel.
pub struct GraphqlChannel {
    client: reqwest::Client,
    endpoints: TwitterEndpoints,
    pool: Arc<CredentialPool>,
    limiter: DistributedRateLimiter,
    page_delay: DelayRange,
}

#[async_trait::async_trait]
impl TweetChannel for GraphqlChannel {
    async fn fetch_user_tweets(
        &self,
        uid: &str,
        username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<Tweet>, FetchError> {
        if self.endpoints.user_tweets.is_empty() {
            return Err(FetchError::Config {
                message: "twitter.endpoints.user_tweets is not configured".to_string(),
            });
        }

        let mut tweets = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..pages.max(1) {
            if page > 0 {
                polite_delay(self.page_delay).await;
            }
            self.limiter.acquire().await;
            let credential = self.pool.next_available(AccountType::Normal).await?;
            let root = graphql_get(
                &self.client,
                &self.pool,
                &credential,
                &self.endpoints.user_tweets,
                params::user_tweets_variables(uid, size, cursor.as_deref()),
                params::timeline_features(),
                &[],
            )
            .await?;

            let (page_tweets, next_cursor) = envelope::parse_user_tweets(&root, username);
            tweets.extend(page_tweets);
            cursor = next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        Ok(tweets)
    }

    async fn fetch_user_followings(
        &self,
        uid: &str,
        _username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<UserRecord>, FetchError> {
        if self.endpoints.user_followings.is_empty() {
            return Err(FetchError::Config {
                message: "twitter.endpoints.user_followings is not configured".to_string(),
            });
        }

        let mut followings = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..pages.max(1) {
            if page > 0 {
                polite_delay(self.page_delay).await;
            }
            self.limiter.acquire().await;
            let credential = self.pool.next_available(AccountType::Normal).await?;
            let root = graphql_get(
                &self.client,
                &self.pool,
                &credential,
                &self.endpoints.user_followings,
                params::followings_variables(uid, size, cursor.as_deref()),
                params::timeline_features(),
                &[],
            )
            .await?;

            let (page_users, next_cursor) = envelope::parse_followings(&root);
            followings.extend(page_users);
            cursor = next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        Ok(followings)
    }
}

/// RapidAPI-style third-party channel. The upstream caps page sizes at 20
/// tweets and 70 followings per request.
pub struct RapidChannel {
    client: reqwest::Client,
    channel: ChannelConfig,
    limiter: DistributedRateLimiter,
    page_delay: DelayRange,
}

impl RapidChannel {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        self.limiter.acquire().await;
        let response = self
            .client
            .get(format!("{}{path}", self.channel.url))
            .header("x-rapidapi-host", &self.channel.api_host)
            .header("x-rapidapi-key", &self.channel.api_key)
            .query(query)
            .send()
            .await
            .map_err(http::transport_error)?;
        http::read_json(response).await
    }
}

#[async_trait::async_trait]
impl TweetChannel for RapidChannel {
    async fn fetch_user_tweets(
        &self,
        uid: &str,
        username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<Tweet>, FetchError> {
        if size > 20 {
            return Err(FetchError::Transient {
                status: 400,
                message: "rapid channel page size must not exceed 20".to_string(),
            });
        }

        let mut tweets = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..pages.max(1) {
            if page > 0 {
                polite_delay(self.page_delay).await;
            }
            let mut query = vec![("user", uid.to_string()), ("count", size.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let root = self.get("/user-tweets", &query).await?;
            let list = root
                .pointer("/result/timeline/instructions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let (page_tweets, next_cursor) = envelope::parse_tweet_instructions(&list, username);
            tweets.extend(page_tweets);
            cursor = next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        Ok(tweets)
    }

    async fn fetch_user_followings(
        &self,
        uid: &str,
        _username: &str,
        pages: usize,
        size: usize,
    ) -> Result<Vec<UserRecord>, FetchError> {
        if size > 70 {
            return Err(FetchError::Transient {
                status: 400,
                message: "rapid channel page size must not exceed 70".to_string(),
            });
        }

        let mut followings = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..pages.max(1) {
            if page > 0 {
                polite_delay(self.page_delay).await;
            }
            let mut query = vec![("user", uid.to_string()), ("count", size.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let root = self.get("/followings", &query).await?;
            let list = root
                .pointer("/result/timeline/instructions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let (page_users, next_cursor) = envelope::parse_user_instructions(&list);
            followings.extend(page_users);
            cursor = next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        Ok(followings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::MemoryRateLimitStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rapid_channel(server: &MockServer, rate_per_sec: f64) -> RapidChannel {
        RapidChannel {
            client: http::build_client(None).expect("client"),
            channel: ChannelConfig {
                url: server.uri(),
                api_host: "twitter241.p.rapidapi.com".to_string(),
                api_key: "test-key".to_string(),
                rate_per_sec,
            },
            limiter: DistributedRateLimiter::new(
                Arc::new(MemoryRateLimitStore::new()),
                "twitter:rapid",
                rate_per_sec,
            ),
            page_delay: DelayRange::zero(),
        }
    }

    fn rapid_tweets_body(ids: &[&str], cursor: Option<&str>) -> Value {
        let mut entries: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "entryId": format!("tweet-{id}"),
                    "content": {"itemContent": {"tweet_results": {"result": {
                        "rest_id": id,
                        "__typename": "Tweet",
                        "views": {"count": "100"},
                        "legacy": {"full_text": "t", "favorite_count": 1}
                    }}}}
                })
            })
            .collect();
        if let Some(cursor) = cursor {
            entries.push(json!({
                "entryId": "cursor-bottom-1",
                "content": {"value": cursor}
            }));
        }
        json!({"result": {"timeline": {"instructions": [
            {"type": "TimelineAddEntries", "entries": entries}
        ]}}})
    }

    #[tokio::test]
    async fn rapid_tweets_sends_key_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user-tweets"))
            .and(query_param("user", "42"))
            .and(header("x-rapidapi-key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(rapid_tweets_body(&["1", "2"], None)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let channel = rapid_channel(&server, 100.0);
        let tweets = channel
            .fetch_user_tweets("42", "alice", 1, 20)
            .await
            .expect("tweets");
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0].url, "https://x.com/alice/status/1");
    }

    #[tokio::test]
    async fn rapid_tweets_follows_cursor_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user-tweets"))
            .and(query_param("cursor", "NEXT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rapid_tweets_body(&["3"], None)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user-tweets"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(rapid_tweets_body(&["1", "2"], Some("NEXT"))),
            )
            .mount(&server)
            .await;

        let channel = rapid_channel(&server, 100.0);
        let tweets = channel
            .fetch_user_tweets("42", "alice", 2, 20)
            .await
            .expect("tweets");
        assert_eq!(tweets.len(), 3);
    }

    #[tokio::test]
    async fn rapid_rejects_oversized_pages() {
        let server = MockServer::start().await;
        let channel = rapid_channel(&server, 100.0);
        assert!(channel.fetch_user_tweets("42", "a", 1, 21).await.is_err());
        assert!(channel.fetch_user_followings("42", "a", 1, 71).await.is_err());
    }

    #[tokio::test]
    async fn factory_rejects_unknown_channel() {
        let mut config = Config::default();
        config.twitter.tweet_channel = "carrier-pigeon".to_string();
        let admin = Arc::new(crate::credentials::admin::AdminClient::new(
            "http://127.0.0.1:1",
            crate::task::Platform::Twitter,
        ));
        let pool = Arc::new(CredentialPool::new(admin, config.credentials.clone()));
        let store = Arc::new(MemoryRateLimitStore::new());
        assert!(make_tweet_channel(&config, pool, store).is_err());
    }

    #[tokio::test]
    async fn factory_requires_rapid_config() {
        let mut config = Config::default();
        config.twitter.tweet_channel = "rapid".to_string();
        let admin = Arc::new(crate::credentials::admin::AdminClient::new(
            "http://127.0.0.1:1",
            crate::task::Platform::Twitter,
        ));
        let pool = Arc::new(CredentialPool::new(admin, config.credentials.clone()));
        let store = Arc::new(MemoryRateLimitStore::new());
        assert!(matches!(
            make_tweet_channel(&config, pool, store).err(),
            Some(FetchError::Config { .. })
        ));
    }
}
