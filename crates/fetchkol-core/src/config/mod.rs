//! Configuration management for fetchkol.
//!
//! The deployment configuration is a single YAML document. The path is taken
//! from the `FETCHER_CONFIG` environment variable, falling back to
//! `config/config.yaml`. Configuration is immutable for the lifetime of a
//! worker process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Outbound proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Task log database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Admin credential service settings.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Work queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Credential lease tuning.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Twitter endpoints and channels.
    #[serde(default)]
    pub twitter: TwitterConfig,

    /// Instagram endpoints.
    #[serde(default)]
    pub instagram: InstagramConfig,

    /// TikTok endpoints.
    #[serde(default)]
    pub tiktok: TiktokConfig,

    /// Similar-user aggregator tuning.
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

/// Outbound HTTP proxy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Whether the proxy is applied to outbound platform calls.
    #[serde(default)]
    pub enabled: bool,
    /// Proxy URL, e.g. `http://127.0.0.1:7890`.
    #[serde(default)]
    pub url: String,
}

impl ProxyConfig {
    /// The proxy URL if proxying is enabled and configured.
    pub fn active_url(&self) -> Option<&str> {
        if self.enabled && !self.url.is_empty() {
            Some(&self.url)
        } else {
            None
        }
    }
}

fn default_database_url() -> String {
    "sqlite:fetchkol.db".to_string()
}

/// Task log database.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL.
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_admin_service_name() -> String {
    "admin".to_string()
}

/// Admin credential service.
///
/// `base_url` is the resolved address of the service; resolving it through a
/// service registry is the deployment's concern, not the engine's.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Base URL of the admin service.
    #[serde(default)]
    pub base_url: String,
    /// Registry name of the admin service, kept for operator reference.
    #[serde(default = "default_admin_service_name")]
    pub service_name: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            service_name: default_admin_service_name(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

/// Work queue settings for the in-process transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Bounded channel capacity.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

fn default_main_cooldown_secs() -> u64 {
    5
}

fn default_normal_cooldown_secs() -> u64 {
    60
}

fn default_main_lease_count() -> u32 {
    1
}

fn default_normal_lease_count() -> u32 {
    10
}

fn default_all_cooling_wait_secs() -> u64 {
    10
}

fn default_release_delay_secs() -> u64 {
    60
}

/// Credential lease tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// Cool-down between uses of one main credential.
    #[serde(default = "default_main_cooldown_secs")]
    pub main_cooldown_secs: u64,
    /// Cool-down between uses of one normal credential.
    #[serde(default = "default_normal_cooldown_secs")]
    pub normal_cooldown_secs: u64,
    /// How many main credentials to lease per task.
    #[serde(default = "default_main_lease_count")]
    pub main_lease_count: u32,
    /// How many normal credentials to lease per task.
    #[serde(default = "default_normal_lease_count")]
    pub normal_lease_count: u32,
    /// Sleep while every leased credential is cooling.
    #[serde(default = "default_all_cooling_wait_secs")]
    pub all_cooling_wait_secs: u64,
    /// Server-side cool-off requested when releasing normal credentials.
    #[serde(default = "default_release_delay_secs")]
    pub release_delay_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            main_cooldown_secs: default_main_cooldown_secs(),
            normal_cooldown_secs: default_normal_cooldown_secs(),
            main_lease_count: default_main_lease_count(),
            normal_lease_count: default_normal_lease_count(),
            all_cooling_wait_secs: default_all_cooling_wait_secs(),
            release_delay_secs: default_release_delay_secs(),
        }
    }
}

fn default_tweet_channel() -> String {
    "graphql".to_string()
}

fn default_rate_per_sec() -> f64 {
    1.0
}

/// Twitter GraphQL endpoints and channel table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwitterConfig {
    /// GraphQL endpoint URLs, keyed by operation.
    #[serde(default)]
    pub endpoints: TwitterEndpoints,
    /// Which channel serves `user_tweets` / `user_followings`.
    #[serde(default = "default_tweet_channel")]
    pub tweet_channel: String,
    /// Per-channel transport settings, keyed by channel name.
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            endpoints: TwitterEndpoints::default(),
            tweet_channel: default_tweet_channel(),
            channels: HashMap::new(),
        }
    }
}

/// Twitter GraphQL endpoint URLs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TwitterEndpoints {
    /// UserByScreenName operation.
    #[serde(default)]
    pub user_by_screen_name: String,
    /// ConnectTabTimeline operation (similar users).
    #[serde(default)]
    pub similar_users: String,
    /// UserTweets operation.
    #[serde(default)]
    pub user_tweets: String,
    /// SearchTimeline operation.
    #[serde(default)]
    pub search_timeline: String,
    /// Following operation.
    #[serde(default)]
    pub user_followings: String,
}

/// One upstream channel for tweet / followings retrieval.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Base URL of the channel, for third-party transports.
    #[serde(default)]
    pub url: String,
    /// API host header value, for RapidAPI-style transports.
    #[serde(default)]
    pub api_host: String,
    /// API key, for RapidAPI-style transports.
    #[serde(default)]
    pub api_key: String,
    /// Rate limit of the channel's `twitter:<channel>` bucket.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_host: String::new(),
            api_key: String::new(),
            rate_per_sec: default_rate_per_sec(),
        }
    }
}

/// Instagram GraphQL endpoints. Most calls carry a `doc_id` form field.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstagramConfig {
    /// Endpoint table.
    #[serde(default)]
    pub endpoints: InstagramEndpoints,
}

/// Instagram endpoint URLs and document ids.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstagramEndpoints {
    /// Profile by uid.
    #[serde(default)]
    pub user_by_uid: DocEndpoint,
    /// Discover-chaining (similar users).
    #[serde(default)]
    pub similar_users: DocEndpoint,
    /// User reels connection.
    #[serde(default)]
    pub user_reels: DocEndpoint,
    /// Top search results.
    #[serde(default)]
    pub top_serp: DocEndpoint,
}

/// An endpoint URL paired with a GraphQL document id.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocEndpoint {
    /// Endpoint URL.
    #[serde(default)]
    pub url: String,
    /// GraphQL document id sent as a form field.
    #[serde(default)]
    pub doc_id: String,
}

/// TikTok endpoints. `similar_users` and `search_users` are URL templates
/// with `{username}` / `{query}` / `{count}` placeholders.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TiktokConfig {
    /// Endpoint table.
    #[serde(default)]
    pub endpoints: TiktokEndpoints,
}

/// TikTok endpoint URLs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TiktokEndpoints {
    /// Similar users URL template.
    #[serde(default)]
    pub similar_users: String,
    /// User search URL template.
    #[serde(default)]
    pub search_users: String,
    /// Followings list endpoint.
    #[serde(default)]
    pub user_followings: String,
}

fn default_second_level_parents() -> usize {
    20
}

fn default_followings_page_size() -> usize {
    70
}

fn default_page_delay() -> DelayRange {
    DelayRange {
        min_ms: 1000,
        max_ms: 3000,
    }
}

fn default_sibling_delay() -> DelayRange {
    DelayRange {
        min_ms: 500,
        max_ms: 1500,
    }
}

/// Similar-user aggregator tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    /// How many first-level candidates seed the second-level fan-out.
    #[serde(default = "default_second_level_parents")]
    pub second_level_parents: usize,
    /// Page size of the followings source.
    #[serde(default = "default_followings_page_size")]
    pub followings_page_size: usize,
    /// Polite delay between successive pages of one strategy.
    #[serde(default = "default_page_delay")]
    pub page_delay: DelayRange,
    /// Polite delay between second-level fan-out siblings.
    #[serde(default = "default_sibling_delay")]
    pub sibling_delay: DelayRange,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            second_level_parents: default_second_level_parents(),
            followings_page_size: default_followings_page_size(),
            page_delay: default_page_delay(),
            sibling_delay: default_sibling_delay(),
        }
    }
}

/// An inclusive millisecond delay range for polite sleeps.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DelayRange {
    /// Minimum delay in milliseconds.
    pub min_ms: u64,
    /// Maximum delay in milliseconds.
    pub max_ms: u64,
}

impl DelayRange {
    /// A zero-length range, used by tests to disable sleeping.
    pub fn zero() -> Self {
        Self {
            min_ms: 0,
            max_ms: 0,
        }
    }
}

impl Config {
    /// Resolve the config path: `FETCHER_CONFIG` env var, else
    /// `config/config.yaml` under the working directory.
    pub fn default_path() -> PathBuf {
        env::var("FETCHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/config.yaml"))
    }

    /// Load and validate configuration from the resolved path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load and validate configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.display().to_string(),
        })?;
        let config = Self::parse(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without validation.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml { source })
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.base_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "admin.base_url".to_string(),
            });
        }

        if self.twitter.tweet_channel != "graphql"
            && !self.twitter.channels.contains_key(&self.twitter.tweet_channel)
        {
            return Err(ConfigError::InvalidValue {
                field: "twitter.tweet_channel".to_string(),
                message: format!(
                    "channel '{}' has no entry under twitter.channels",
                    self.twitter.tweet_channel
                ),
            });
        }

        for (name, channel) in &self.twitter.channels {
            if channel.rate_per_sec <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("twitter.channels.{name}.rate_per_sec"),
                    message: "must be positive".to_string(),
                });
            }
        }

        if self.aggregator.page_delay.min_ms > self.aggregator.page_delay.max_ms {
            return Err(ConfigError::InvalidValue {
                field: "aggregator.page_delay".to_string(),
                message: "min_ms must not exceed max_ms".to_string(),
            });
        }
        if self.aggregator.sibling_delay.min_ms > self.aggregator.sibling_delay.max_ms {
            return Err(ConfigError::InvalidValue {
                field: "aggregator.sibling_delay".to_string(),
                message: "min_ms must not exceed max_ms".to_string(),
            });
        }

        Ok(())
    }

    /// The rate-limit bucket key for a Twitter channel.
    pub fn channel_bucket_key(channel: &str) -> String {
        format!("twitter:{channel}")
    }
}
