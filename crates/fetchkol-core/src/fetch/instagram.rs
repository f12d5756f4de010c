//! Instagram fetch strategy.
//!
//! Instagram's GraphQL surface takes form-POSTed `doc_id` + `variables`
//! pairs. Username resolution is the one HTML path: the profile page embeds
//! JSON script blocks carrying the numeric profile id. A response redirected
//! onto the suspension path means the credential is burned; the strategy
//! reports it disabled immediately and surfaces a 403.

use std::sync::Arc;

use scraper::{Html, Selector};
use serde_json::{json, Value};

use crate::config::{Config, DelayRange, InstagramEndpoints};
use crate::credentials::pool::CredentialPool;
use crate::credentials::Credential;
use crate::error::FetchError;
use crate::fetch::{
    extract_email, http, polite_delay, random_user_agent, Reel, UserRecord,
};
use crate::task::Platform;

/// Web-app id Instagram's own client sends on every API call.
const IG_APP_ID: &str = "936619743392459";

/// URL path prefix of the account-suspended interstitial.
const SUSPENDED_PATH: &str = "/accounts/suspended";

/// Upstream page-size cap for the reels connection.
const REELS_PAGE_SIZE: usize = 12;

/// Reels fetched per user when computing the average plays.
const REELS_FETCH_COUNT: usize = 15;

/// Pages of zero new users tolerated before a paged search stops.
const MAX_STALE_PAGES: u32 = 3;

/// Whether a final response URL landed on the suspension interstitial.
pub fn is_suspension_url(url: &reqwest::Url) -> bool {
    url.path().starts_with(SUSPENDED_PATH)
}

/// Instagram strategy over a per-task credential pool.
pub struct InstagramFetcher {
    client: reqwest::Client,
    endpoints: InstagramEndpoints,
    pool: Arc<CredentialPool>,
    page_delay: DelayRange,
}

impl InstagramFetcher {
    /// Build the strategy.
    pub fn new(config: &Config, pool: Arc<CredentialPool>) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(config.proxy.active_url())?,
            endpoints: config.instagram.endpoints.clone(),
            pool,
            page_delay: config.aggregator.page_delay,
        })
    }

    fn apply_headers(
        &self,
        request: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        request
            .header("user-agent", random_user_agent())
            .header(
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("accept-language", "en-US,en;q=0.9")
            .header("x-ig-app-id", IG_APP_ID)
            .header("x-csrftoken", credential.header("x-csrftoken"))
            .header("cookie", credential.header("cookie"))
    }

    /// POST one `doc_id` GraphQL call and return the parsed body.
    ///
    /// The suspension-redirect check runs first: it wins over any status
    /// code the interstitial answers with.
    async fn doc_post(
        &self,
        url: &str,
        doc_id: &str,
        variables: &Value,
        credential: &Credential,
    ) -> Result<Value, FetchError> {
        if url.is_empty() || doc_id.is_empty() {
            return Err(FetchError::Config {
                message: "instagram endpoint is not configured".to_string(),
            });
        }

        let form = [("doc_id", doc_id.to_string()), ("variables", variables.to_string())];
        let response = self
            .apply_headers(self.client.post(url), credential)
            .form(&form)
            .send()
            .await
            .map_err(http::transport_error)?;

        if is_suspension_url(response.url()) {
            tracing::error!(url = %response.url(), "redirected to suspension page");
            self.pool.report_suspended_redirect(credential.id).await;
            return Err(FetchError::AccountSuspended);
        }

        http::read_json(response).await
    }

    /// Fetch a profile by numeric uid.
    pub async fn fetch_profile_by_uid(&self, uid: &str) -> Result<UserRecord, FetchError> {
        let credential = self.pool.main().await?;
        let variables = json!({ "id": uid, "render_surface": "PROFILE" });
        let root = self
            .doc_post(
                &self.endpoints.user_by_uid.url,
                &self.endpoints.user_by_uid.doc_id,
                &variables,
                &credential,
            )
            .await?;

        let user = root.pointer("/data/user").filter(|u| !u.is_null()).ok_or_else(|| {
            FetchError::NotFound {
                message: format!("no profile for uid {uid}"),
            }
        })?;

        let username = user
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let bio = user
            .get("biography")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut record = UserRecord::new(Platform::Instagram);
        record.uid = uid.to_string();
        record.nickname = user
            .get("full_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        record.is_verified = user.get("is_verified").and_then(Value::as_bool).unwrap_or(false);
        record.followers_count = user.get("follower_count").and_then(Value::as_u64).unwrap_or(0);
        record.following_count = user.get("following_count").and_then(Value::as_u64).unwrap_or(0);
        record.post_count = user.get("media_count").and_then(Value::as_u64).unwrap_or(0);
        record.email_in_bio = extract_email(&bio);
        record.bio = bio;
        record.url = Platform::Instagram.profile_url(&username);
        record.username = username;
        Ok(record)
    }

    /// Resolve a username to its numeric profile id by scraping the profile
    /// page's embedded JSON.
    pub async fn resolve_profile_id(&self, username: &str) -> Result<String, FetchError> {
        let credential = self.pool.main().await?;
        let url = Platform::Instagram.profile_url(username);
        let response = self
            .apply_headers(self.client.get(&url), &credential)
            .send()
            .await
            .map_err(http::transport_error)?;

        if is_suspension_url(response.url()) {
            self.pool.report_suspended_redirect(credential.id).await;
            return Err(FetchError::AccountSuspended);
        }

        let html = http::read_html(response).await?;
        if html.contains("Page Not Found") {
            return Err(FetchError::NotFound {
                message: format!("instagram user {username} does not exist"),
            });
        }

        find_profile_id_in_html(&html).ok_or_else(|| FetchError::NotFound {
            message: format!("no profile id in page for {username}"),
        })
    }

    /// One discover-chaining call: users Instagram considers similar to
    /// `uid`, hydrated into full profiles.
    pub async fn similar_users(&self, uid: &str) -> Result<Vec<UserRecord>, FetchError> {
        let credential = self.pool.main().await?;
        let variables = json!({ "module": "profile", "target_id": uid });
        let root = self
            .doc_post(
                &self.endpoints.similar_users.url,
                &self.endpoints.similar_users.doc_id,
                &variables,
                &credential,
            )
            .await?;

        let chained = root
            .pointer("/data/xdt_api__v1__discover__chaining/users")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut users = Vec::new();
        for user in chained {
            let Some(pk) = value_as_id(user.get("pk")) else {
                continue;
            };
            match self.fetch_profile_by_uid(&pk).await {
                Ok(profile) => users.push(profile),
                Err(FetchError::AccountSuspended) => return Err(FetchError::AccountSuspended),
                Err(e) => {
                    tracing::warn!(pk, error = %e, "failed to hydrate chained user");
                }
            }
        }
        Ok(users)
    }

    /// Paged user search over the top search results grid.
    ///
    /// Pagination carries a `rank_token` / `next_max_id` pair. Stops at
    /// `count`, on an exhausted grid, or after three pages with no new
    /// users.
    pub async fn search_users(&self, query: &str, count: usize) -> Result<Vec<UserRecord>, FetchError> {
        let mut all_users: Vec<UserRecord> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut rank_token: Option<String> = None;
        let mut next_max_id: Option<String> = None;
        let mut stale_pages = 0u32;

        while all_users.len() < count {
            let credential = self.pool.main().await?;
            let url = &self.endpoints.top_serp.url;
            if url.is_empty() {
                return Err(FetchError::Config {
                    message: "instagram.endpoints.top_serp is not configured".to_string(),
                });
            }

            let mut params = vec![
                ("enable_metadata", "true".to_string()),
                ("query", query.to_string()),
            ];
            if let Some(token) = &rank_token {
                params.push(("rank_token", token.clone()));
            }
            if let Some(max_id) = &next_max_id {
                params.push(("next_max_id", max_id.clone()));
            }

            let response = self
                .apply_headers(self.client.get(url), &credential)
                .query(&params)
                .send()
                .await
                .map_err(http::transport_error)?;

            if is_suspension_url(response.url()) {
                self.pool.report_suspended_redirect(credential.id).await;
                return Err(FetchError::AccountSuspended);
            }

            let root = match http::read_json(response).await {
                Ok(root) => root,
                Err(e) if !all_users.is_empty() && !e.is_fatal() => {
                    tracing::warn!(query, error = %e, "search page failed, returning partial");
                    break;
                }
                Err(e) => return Err(e),
            };

            rank_token = root
                .pointer("/media_grid/rank_token")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let new_max_id = root
                .pointer("/media_grid/next_max_id")
                .and_then(Value::as_str)
                .map(ToString::to_string);

            let before = seen.len();
            for section in root
                .pointer("/media_grid/sections")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
            {
                for media in section
                    .pointer("/layout_content/medias")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
                {
                    let Some(pk) = value_as_id(media.pointer("/media/user/pk")) else {
                        continue;
                    };
                    if !seen.insert(pk.clone()) {
                        continue;
                    }
                    match self.fetch_profile_by_uid(&pk).await {
                        Ok(profile) => all_users.push(profile),
                        Err(FetchError::AccountSuspended) => {
                            return Err(FetchError::AccountSuspended)
                        }
                        Err(e) => {
                            tracing::warn!(pk, error = %e, "failed to hydrate search user");
                        }
                    }
                }
            }

            if seen.len() == before {
                stale_pages += 1;
            } else {
                stale_pages = 0;
            }
            tracing::info!(query, collected = all_users.len(), target = count, "search progress");

            if all_users.len() >= count || new_max_id.is_none() {
                break;
            }
            next_max_id = new_max_id;
            if stale_pages >= MAX_STALE_PAGES {
                tracing::info!(query, "three pages without new users, stopping search");
                break;
            }
            polite_delay(self.page_delay).await;
        }

        all_users.truncate(count);

        // Search results ship with their average reel plays attached.
        for user in &mut all_users {
            match self.user_reels(&user.uid, REELS_FETCH_COUNT).await {
                Ok(reels) => {
                    let samples: Vec<crate::fetch::EngagementSample> =
                        reels.iter().map(Into::into).collect();
                    user.avg_play_last_10_reels = crate::fetch::average_views(&samples);
                }
                Err(FetchError::AccountSuspended) => return Err(FetchError::AccountSuspended),
                Err(e) => {
                    tracing::warn!(username = %user.username, error = %e, "reels fetch failed");
                    user.avg_play_last_10_reels = None;
                }
            }
        }

        Ok(all_users)
    }

    /// Recent reels for a user, newest first, up to `count`.
    pub async fn user_reels(&self, uid: &str, count: usize) -> Result<Vec<Reel>, FetchError> {
        let credential = self.pool.main().await?;
        let mut reels: Vec<Reel> = Vec::new();
        let mut cursor: Option<String> = None;

        while reels.len() < count {
            let mut variables = json!({
                "data": {
                    "include_feed_video": true,
                    "page_size": REELS_PAGE_SIZE.min(count),
                    "target_user_id": uid
                }
            });
            if let Some(after) = &cursor {
                variables["after"] = json!(after);
                variables["before"] = Value::Null;
                variables["first"] = json!(4);
                variables["last"] = Value::Null;
            }

            let root = self
                .doc_post(
                    &self.endpoints.user_reels.url,
                    &self.endpoints.user_reels.doc_id,
                    &variables,
                    &credential,
                )
                .await?;

            let connection = root
                .pointer("/data/xdt_api__v1__clips__user__connection_v2")
                .cloned()
                .unwrap_or(Value::Null);

            for edge in connection
                .get("edges")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
            {
                let Some(media) = edge.pointer("/node/media").filter(|m| !m.is_null()) else {
                    continue;
                };
                let pinned = media
                    .get("clips_tab_pinned_user_ids")
                    .and_then(Value::as_array)
                    .is_some_and(|ids| ids.iter().any(|id| value_as_id(Some(id)).as_deref() == Some(uid)));
                let shortcode = media
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                reels.push(Reel {
                    id: value_as_id(media.get("id")).unwrap_or_default(),
                    url: format!("https://www.instagram.com/reel/{shortcode}/"),
                    shortcode,
                    like_count: media.get("like_count").and_then(Value::as_u64).unwrap_or(0),
                    comment_count: media.get("comment_count").and_then(Value::as_u64).unwrap_or(0),
                    play_count: media.get("play_count").and_then(Value::as_u64).unwrap_or(0),
                    is_pinned: pinned,
                });
            }

            let has_next = connection
                .pointer("/page_info/has_next_page")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            cursor = if has_next {
                connection
                    .pointer("/page_info/end_cursor")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            } else {
                None
            };

            if cursor.is_none() || reels.len() >= count {
                break;
            }
            polite_delay(self.page_delay).await;
        }

        reels.truncate(count);
        Ok(reels)
    }
}

/// Accept ids that arrive as strings or numbers.
fn value_as_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Walk the profile page's JSON script blocks for a profile id.
fn find_profile_id_in_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[type="application/json"]"#).ok()?;

    for script in document.select(&selector) {
        let text: String = script.text().collect();
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            if let Some(id) = find_profile_id(&value) {
                return Some(id);
            }
        }
    }

    // Fallbacks for markup variants that inline the id elsewhere.
    let page_re = regex::Regex::new(r#""profilePage_(\d+)""#).ok()?;
    if let Some(cap) = page_re.captures(html) {
        return Some(cap[1].to_string());
    }
    let id_re = regex::Regex::new(r#""id":"(\d+)""#).ok()?;
    id_re.captures(html).map(|cap| cap[1].to_string())
}

/// Depth-first search for a `profile_id` key.
fn find_profile_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(id) = map.get("profile_id") {
                if let Some(id) = value_as_id(Some(id)) {
                    return Some(id);
                }
            }
            map.values().find_map(find_profile_id)
        }
        Value::Array(items) => items.iter().find_map(find_profile_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocEndpoint;
    use crate::credentials::admin::AdminClient;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_admin(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/instagram/accounts/lock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accounts": [{"id": 1, "username": "ig1", "headers":
                    {"x-csrftoken": "tok", "cookie": "sessionid=s"}}]
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/instagram/accounts/update_status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
    }

    fn fetcher_for(server: &MockServer) -> InstagramFetcher {
        let mut config = Config::default();
        config.admin.base_url = server.uri();
        config.instagram.endpoints = InstagramEndpoints {
            user_by_uid: DocEndpoint {
                url: format!("{}/graphql/query", server.uri()),
                doc_id: "111".to_string(),
            },
            similar_users: DocEndpoint {
                url: format!("{}/graphql/chaining", server.uri()),
                doc_id: "222".to_string(),
            },
            user_reels: DocEndpoint {
                url: format!("{}/graphql/reels", server.uri()),
                doc_id: "333".to_string(),
            },
            top_serp: DocEndpoint {
                url: format!("{}/api/top_serp", server.uri()),
                doc_id: String::new(),
            },
        };
        config.aggregator.page_delay = DelayRange::zero();
        config.aggregator.sibling_delay = DelayRange::zero();

        let admin = Arc::new(AdminClient::new(server.uri(), Platform::Instagram));
        let pool = Arc::new(CredentialPool::new(admin, config.credentials.clone()));
        InstagramFetcher::new(&config, pool).expect("fetcher")
    }

    fn profile_body(username: &str, followers: u64) -> Value {
        json!({"data": {"user": {
            "username": username,
            "full_name": "Full Name",
            "is_verified": true,
            "follower_count": followers,
            "following_count": 10,
            "media_count": 42,
            "biography": "dm me: biz@example.com"
        }}})
    }

    #[tokio::test]
    async fn profile_by_uid_parses_record() {
        let server = MockServer::start().await;
        mount_admin(&server).await;
        Mock::given(method("POST"))
            .and(path("/graphql/query"))
            .and(body_string_contains("doc_id=111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body("kim", 900)))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server);
        let profile = fetcher.fetch_profile_by_uid("55").await.expect("profile");
        assert_eq!(profile.username, "kim");
        assert_eq!(profile.post_count, 42);
        assert_eq!(profile.email_in_bio, "biz@example.com");
        assert_eq!(profile.url, "https://www.instagram.com/kim");
    }

    #[tokio::test]
    async fn suspension_redirect_reports_disabled_and_maps_403() {
        let server = MockServer::start().await;
        // Mounted before the generic admin mocks so the expectation sees
        // the status update.
        Mock::given(method("POST"))
            .and(path("/v1/instagram/accounts/update_status"))
            .and(body_string_contains("disabled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        mount_admin(&server).await;
        Mock::given(method("POST"))
            .and(path("/graphql/query"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "/accounts/suspended/?next=%2F"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/suspended/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>suspended</html>"))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server);
        let err = fetcher.fetch_profile_by_uid("55").await.expect_err("suspended");
        assert!(matches!(err, FetchError::AccountSuspended));
        assert_eq!(err.http_code(), 403);
        assert_eq!(err.to_string(), "账号被挂起");
    }

    #[tokio::test]
    async fn similar_users_hydrates_chained_profiles() {
        let server = MockServer::start().await;
        mount_admin(&server).await;
        Mock::given(method("POST"))
            .and(path("/graphql/chaining"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"xdt_api__v1__discover__chaining": {"users": [
                    {"pk": 100, "username": "a"},
                    {"pk": "200", "username": "b"},
                    {"username": "no-pk"}
                ]}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_body("sim", 10)))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server);
        let users = fetcher.similar_users("9").await.expect("similar");
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].uid, "100");
        assert_eq!(users[1].uid, "200");
    }

    #[tokio::test]
    async fn reels_mark_pinned_and_follow_cursor() {
        let server = MockServer::start().await;
        mount_admin(&server).await;
        let page1 = json!({"data": {"xdt_api__v1__clips__user__connection_v2": {
            "edges": [
                {"node": {"media": {"id": "m1", "code": "AA", "like_count": 5,
                    "comment_count": 1, "play_count": 900,
                    "clips_tab_pinned_user_ids": [55]}}},
                {"node": {"media": {"id": "m2", "code": "BB", "play_count": 100}}}
            ],
            "page_info": {"has_next_page": true, "end_cursor": "CUR2"}
        }}});
        let page2 = json!({"data": {"xdt_api__v1__clips__user__connection_v2": {
            "edges": [
                {"node": {"media": {"id": "m3", "code": "CC", "play_count": 50}}}
            ],
            "page_info": {"has_next_page": false, "end_cursor": null}
        }}});
        Mock::given(method("POST"))
            .and(path("/graphql/reels"))
            .and(body_string_contains("CUR2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page2))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql/reels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page1))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(&server);
        let reels = fetcher.user_reels("55", 10).await.expect("reels");
        assert_eq!(reels.len(), 3);
        assert!(reels[0].is_pinned);
        assert!(!reels[1].is_pinned);
        assert_eq!(reels[0].url, "https://www.instagram.com/reel/AA/");
        assert_eq!(reels[2].id, "m3");
    }

    #[test]
    fn profile_id_found_in_script_block() {
        let html = r#"<html><body>
            <script type="application/json">{"require": [{"data": {"profile_id": "777"}}]}</script>
        </body></html>"#;
        assert_eq!(find_profile_id_in_html(html).as_deref(), Some("777"));
    }

    #[test]
    fn profile_id_regex_fallbacks() {
        let html = r#"<html><script>var x = {"profilePage_12345": 1};</script></html>"#;
        assert_eq!(find_profile_id_in_html(html).as_deref(), Some("12345"));

        let html2 = r#"<html><script>{"user":{"id":"888","name":"x"}}</script></html>"#;
        assert_eq!(find_profile_id_in_html(html2).as_deref(), Some("888"));
    }

    #[test]
    fn suspension_url_detection() {
        let url = reqwest::Url::parse("https://www.instagram.com/accounts/suspended/?next=%2F")
            .expect("url");
        assert!(is_suspension_url(&url));
        let ok = reqwest::Url::parse("https://www.instagram.com/jack/").expect("url");
        assert!(!is_suspension_url(&ok));
    }
}
