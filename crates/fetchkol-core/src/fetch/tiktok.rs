//! TikTok fetch strategy.
//!
//! Profiles come from the rehydration JSON embedded in the public profile
//! page. Similar-user and search endpoints are URL templates hydrated per
//! request; followings use the web API with a `maxCursor`/`minCursor` pair.
//! TikTok calls are credential-free.

use scraper::{Html, Selector};
use serde_json::Value;

use crate::config::{Config, DelayRange, TiktokEndpoints};
use crate::error::FetchError;
use crate::fetch::{extract_email, http, polite_delay, random_user_agent, UserRecord};
use crate::task::Platform;

/// Public host serving profile pages.
const PROFILE_BASE: &str = "https://www.tiktok.com";

/// TikTok strategy.
pub struct TiktokFetcher {
    client: reqwest::Client,
    endpoints: TiktokEndpoints,
    profile_base: String,
    page_delay: DelayRange,
}

impl TiktokFetcher {
    /// Build the strategy.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(config.proxy.active_url())?,
            endpoints: config.tiktok.endpoints.clone(),
            profile_base: PROFILE_BASE.to_string(),
            page_delay: config.aggregator.page_delay,
        })
    }

    /// Override the profile-page host (for testing with wiremock).
    pub fn with_profile_base(mut self, base: impl Into<String>) -> Self {
        self.profile_base = base.into();
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("user-agent", random_user_agent())
            .header(
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("accept-language", "en-US,en;q=0.9")
    }

    /// Fetch a profile by scraping the rehydration blob off the profile
    /// page. Also captures `sec_uid`, which followings paging needs.
    pub async fn fetch_user_profile(&self, username: &str) -> Result<UserRecord, FetchError> {
        let url = format!("{}/@{username}", self.profile_base);
        let response = self.get(&url).send().await.map_err(http::transport_error)?;
        let html = http::read_html(response).await?;

        let blob = rehydration_blob(&html).ok_or_else(|| FetchError::NotFound {
            message: format!("no rehydration data for @{username}"),
        })?;
        parse_profile_blob(&blob).ok_or_else(|| FetchError::NotFound {
            message: format!("no user detail for @{username}"),
        })
    }

    /// Users TikTok lists as similar to `username`, hydrated into profiles.
    pub async fn similar_users(&self, username: &str, count: usize) -> Result<Vec<UserRecord>, FetchError> {
        if self.endpoints.similar_users.is_empty() {
            return Err(FetchError::Config {
                message: "tiktok.endpoints.similar_users is not configured".to_string(),
            });
        }
        let url = self
            .endpoints
            .similar_users
            .replace("{username}", username)
            .replace("{count}", &count.to_string());
        let response = self.get(&url).send().await.map_err(http::transport_error)?;
        let root = http::read_json(response).await?;

        let listed = root
            .get("similar_users")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        self.hydrate_profiles(listed, count).await
    }

    /// Paged-free user search: the endpoint answers with a flat user list;
    /// each hit is hydrated into a full profile.
    pub async fn search_users(&self, query: &str, count: usize) -> Result<Vec<UserRecord>, FetchError> {
        if self.endpoints.search_users.is_empty() {
            return Err(FetchError::Config {
                message: "tiktok.endpoints.search_users is not configured".to_string(),
            });
        }
        let raw = self
            .endpoints
            .search_users
            .replace("{query}", query)
            .replace("{count}", &count.to_string());
        // Url::parse percent-encodes whatever the substitution left raw.
        let url = reqwest::Url::parse(&raw).map_err(|e| FetchError::Config {
            message: format!("invalid tiktok search url: {e}"),
        })?;
        let response = self
            .get(url.as_str())
            .send()
            .await
            .map_err(http::transport_error)?;
        let root = http::read_json(response).await?;

        let listed = root
            .get("user_list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        self.hydrate_profiles(listed, count).await
    }

    async fn hydrate_profiles(
        &self,
        listed: Vec<Value>,
        count: usize,
    ) -> Result<Vec<UserRecord>, FetchError> {
        let mut users = Vec::new();
        for entry in listed {
            let Some(username) = entry.get("unique_id").and_then(Value::as_str) else {
                continue;
            };
            match self.fetch_user_profile(username).await {
                Ok(profile) => users.push(profile),
                Err(e) => {
                    tracing::warn!(username, error = %e, "failed to hydrate tiktok user");
                    continue;
                }
            }
            if users.len() >= count {
                break;
            }
            polite_delay(self.page_delay).await;
        }
        Ok(users)
    }

    /// Followings of `username`, paged with the `maxCursor`/`minCursor`
    /// pair. Resolves `sec_uid` through the profile when absent.
    pub async fn user_followings(
        &self,
        username: &str,
        sec_uid: Option<&str>,
        pages: usize,
        size: usize,
    ) -> Result<Vec<UserRecord>, FetchError> {
        if self.endpoints.user_followings.is_empty() {
            return Err(FetchError::Config {
                message: "tiktok.endpoints.user_followings is not configured".to_string(),
            });
        }

        let sec_uid = match sec_uid {
            Some(id) => id.to_string(),
            None => {
                let profile = self.fetch_user_profile(username).await?;
                profile.sec_uid.ok_or_else(|| FetchError::NotFound {
                    message: format!("no sec_uid for @{username}"),
                })?
            }
        };

        let mut followings = Vec::new();
        let mut max_cursor: i64 = 0;
        let mut min_cursor: i64 = 0;

        for page in 0..pages.max(1) {
            if page > 0 {
                polite_delay(self.page_delay).await;
            }

            let response = self
                .get(&self.endpoints.user_followings)
                .query(&[
                    ("app_language", "en"),
                    ("app_name", "tiktok_web"),
                    ("browser_language", "en-US"),
                    ("browser_name", "Mozilla"),
                    ("browser_online", "true"),
                    ("browser_platform", "MacIntel"),
                    ("channel", "tiktok_web"),
                    ("cookie_enabled", "true"),
                    ("count", &size.to_string()),
                    ("device_platform", "web_pc"),
                    ("from_page", "user"),
                    ("maxCursor", &max_cursor.to_string()),
                    ("minCursor", &min_cursor.to_string()),
                    ("os", "mac"),
                    ("priority_region", "US"),
                    ("region", "US"),
                    ("secUid", &sec_uid),
                ])
                .send()
                .await
                .map_err(http::transport_error)?;
            let root = http::read_json(response).await?;

            let status_code = root.get("statusCode").and_then(Value::as_i64).unwrap_or(0);
            if status_code != 0 {
                let message = root
                    .get("statusMsg")
                    .and_then(Value::as_str)
                    .unwrap_or("tiktok followings request failed")
                    .to_string();
                if followings.is_empty() {
                    return Err(FetchError::Transient {
                        status: 502,
                        message,
                    });
                }
                tracing::warn!(status_code, message, "followings page failed, returning partial");
                break;
            }

            for entry in root
                .get("userList")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
            {
                if let Some(user) = parse_following(&entry) {
                    followings.push(user);
                }
            }

            let next_max = root.get("maxCursor").and_then(Value::as_i64).unwrap_or(max_cursor);
            let next_min = root.get("minCursor").and_then(Value::as_i64).unwrap_or(min_cursor);
            let has_more = root.get("hasMore").and_then(Value::as_bool).unwrap_or(false);

            if !has_more || next_max == 0 || next_max == max_cursor {
                break;
            }
            max_cursor = next_max;
            min_cursor = next_min;
        }

        Ok(followings)
    }
}

/// Pull the `__UNIVERSAL_DATA_FOR_REHYDRATION__` JSON out of a profile page.
fn rehydration_blob(html: &str) -> Option<Value> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[id="__UNIVERSAL_DATA_FOR_REHYDRATION__"]"#).ok()?;
    let script = document.select(&selector).next()?;
    let text: String = script.text().collect();
    serde_json::from_str(&text).ok()
}

/// Build a record from the rehydration blob's `webapp.user-detail` scope.
/// Newer pages carry string-typed counters in `statsV2`; older ones numeric
/// counters in `stats`.
fn parse_profile_blob(blob: &Value) -> Option<UserRecord> {
    let user_info = blob.pointer("/__DEFAULT_SCOPE__/webapp.user-detail/userInfo")?;
    let user = user_info.get("user")?;
    let stats = user_info
        .get("statsV2")
        .filter(|s| !s.is_null())
        .or_else(|| user_info.get("stats"))
        .cloned()
        .unwrap_or(Value::Null);

    let username = user.get("uniqueId").and_then(Value::as_str)?.to_string();
    let bio = user
        .get("signature")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut record = UserRecord::new(Platform::Tiktok);
    record.uid = user
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    record.sec_uid = user
        .get("secUid")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    record.nickname = user
        .get("nickname")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    record.is_verified = user.get("verified").and_then(Value::as_bool).unwrap_or(false);
    record.followers_count = count_field(&stats, "followerCount");
    record.following_count = count_field(&stats, "followingCount");
    record.post_count = count_field(&stats, "videoCount");
    record.email_in_bio = extract_email(&bio);
    record.bio = bio;
    record.country_code = user
        .get("region")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string);
    record.url = Platform::Tiktok.profile_url(&username);
    record.username = username;
    Some(record)
}

/// Build a record from one `userList` entry of the followings API.
fn parse_following(entry: &Value) -> Option<UserRecord> {
    let user = entry.get("user")?;
    let stats = entry.get("stats").cloned().unwrap_or(Value::Null);
    let username = user.get("uniqueId").and_then(Value::as_str)?.to_string();
    let bio = user
        .get("signature")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut record = UserRecord::new(Platform::Tiktok);
    record.uid = user
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    record.sec_uid = user
        .get("secUid")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    record.nickname = user
        .get("nickname")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    record.is_verified = user.get("verified").and_then(Value::as_bool).unwrap_or(false);
    record.followers_count = count_field(&stats, "followerCount");
    record.following_count = count_field(&stats, "followingCount");
    record.post_count = count_field(&stats, "videoCount");
    record.email_in_bio = extract_email(&bio);
    record.bio = bio;
    record.country_code = user
        .get("region")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string);
    record.url = Platform::Tiktok.profile_url(&username);
    record.username = username;
    Some(record)
}

/// Counter that may arrive as a number or a decimal string.
fn count_field(stats: &Value, key: &str) -> u64 {
    match stats.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
