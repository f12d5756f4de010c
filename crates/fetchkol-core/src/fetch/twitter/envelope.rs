//! Twitter GraphQL envelope parsing.
//!
//! Every timeline operation answers with an `instructions` list; entries are
//! picked by instruction type and entry-id prefix (`tweet-`, `user-`,
//! `similartomodule-1`, `profile-conversation-`, `cursor-bottom-`) and the
//! nested record is extracted. Unexpected shapes are skipped, never fatal.

use serde_json::Value;

use crate::fetch::{extract_email, Tweet, UserRecord};
use crate::task::Platform;

/// Extract a candidate record from a `user_results.result` object.
///
/// Newer payloads carry the handle under `core`, older ones under `legacy`;
/// both shapes occur in the wild, sometimes within one response.
pub fn parse_user_result(result: &Value) -> Option<UserRecord> {
    let uid = result.get("rest_id")?.as_str()?.to_string();
    let legacy = result.get("legacy")?;
    if legacy.as_object().map_or(true, serde_json::Map::is_empty) {
        return None;
    }

    let core = result.get("core");
    let username = core
        .and_then(|c| str_field(c, "screen_name"))
        .or_else(|| str_field(legacy, "screen_name"))
        .unwrap_or_default();
    if username.is_empty() {
        return None;
    }

    let bio = str_field(legacy, "description").unwrap_or_default();
    let location = result
        .pointer("/location/location")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| str_field(legacy, "location"))
        .unwrap_or_default();

    let mut record = UserRecord::new(Platform::Twitter);
    record.uid = uid;
    record.email_in_bio = extract_email(&bio);
    record.nickname = core
        .and_then(|c| str_field(c, "name"))
        .or_else(|| str_field(legacy, "name"))
        .unwrap_or_default();
    record.is_verified = result
        .get("is_blue_verified")
        .and_then(Value::as_bool)
        .or_else(|| legacy.get("verified").and_then(Value::as_bool))
        .unwrap_or(false);
    record.followers_count = u64_field(legacy, "followers_count");
    record.following_count = u64_field(legacy, "friends_count");
    record.post_count = u64_field(legacy, "statuses_count");
    record.bio = bio;
    record.location = location;
    record.url = Platform::Twitter.profile_url(&username);
    record.username = username;
    Some(record)
}

/// Parse the subject profile out of a `UserByScreenName` response.
pub fn parse_profile(root: &Value) -> Option<UserRecord> {
    let result = root.pointer("/data/user/result")?;
    parse_user_result(result)
}

/// Parse a `ConnectTabTimeline` (similar users) response.
pub fn parse_similar_users(root: &Value) -> Vec<UserRecord> {
    let mut users = Vec::new();
    for instruction in instructions(root, "/data/connect_tab_timeline/timeline/instructions") {
        if instruction.get("type").and_then(Value::as_str) != Some("TimelineAddEntries") {
            continue;
        }
        for entry in entries(&instruction) {
            if entry.get("entryId").and_then(Value::as_str) != Some("similartomodule-1") {
                continue;
            }
            let Some(items) = entry.pointer("/content/items").and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                if let Some(result) = item.pointer("/item/itemContent/user_results/result") {
                    if let Some(user) = parse_user_result(result) {
                        users.push(user);
                    }
                }
            }
        }
    }
    users
}

/// Extract one tweet from a `tweet_results.result` object.
///
/// Retweets and non-`Tweet` typenames are skipped.
pub fn parse_tweet(result: &Value, username: &str) -> Option<Tweet> {
    let id = result.get("rest_id")?.as_str()?.to_string();
    if result.get("__typename").and_then(Value::as_str) != Some("Tweet") {
        return None;
    }
    let legacy = result.get("legacy")?;
    if legacy.as_object().map_or(true, serde_json::Map::is_empty) {
        return None;
    }
    if legacy.get("is_retweet").and_then(Value::as_bool) == Some(true) {
        return None;
    }

    Some(Tweet {
        url: format!("https://x.com/{username}/status/{id}"),
        id,
        text: str_field(legacy, "full_text").unwrap_or_default(),
        created_at: str_field(legacy, "created_at").unwrap_or_default(),
        favorite_count: u64_field(legacy, "favorite_count"),
        retweet_count: u64_field(legacy, "retweet_count"),
        reply_count: u64_field(legacy, "reply_count"),
        quote_count: u64_field(legacy, "quote_count"),
        views_count: result
            .pointer("/views/count")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        is_pinned: false,
    })
}

/// Walk one timeline instruction list for tweets and the bottom cursor.
///
/// `TimelinePinEntry` yields the pinned tweet; `tweet-` entries yield
/// ordinary tweets; `profile-conversation-` entries yield the original
/// tweet of a self-reply thread.
pub fn parse_tweet_instructions(
    instruction_list: &[Value],
    username: &str,
) -> (Vec<Tweet>, Option<String>) {
    let mut tweets = Vec::new();
    let mut next_cursor = None;

    for instruction in instruction_list {
        match instruction.get("type").and_then(Value::as_str) {
            Some("TimelinePinEntry") => {
                if let Some(result) =
                    instruction.pointer("/entry/content/itemContent/tweet_results/result")
                {
                    if let Some(mut tweet) = parse_tweet(result, username) {
                        tweet.is_pinned = true;
                        tweets.push(tweet);
                    }
                }
            }
            Some("TimelineAddEntries") => {
                for entry in entries(instruction) {
                    let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");
                    if entry_id.starts_with("tweet-") {
                        if let Some(result) =
                            entry.pointer("/content/itemContent/tweet_results/result")
                        {
                            if let Some(tweet) = parse_tweet(result, username) {
                                tweets.push(tweet);
                            }
                        }
                    } else if entry_id.starts_with("profile-conversation-") {
                        if let Some(result) =
                            entry.pointer("/content/items/0/item/itemContent/tweet_results/result")
                        {
                            if let Some(tweet) = parse_tweet(result, username) {
                                tweets.push(tweet);
                            }
                        }
                    } else if entry_id.starts_with("cursor-bottom-") {
                        next_cursor = entry
                            .pointer("/content/value")
                            .and_then(Value::as_str)
                            .map(ToString::to_string);
                    }
                }
            }
            _ => {}
        }
    }

    (tweets, next_cursor)
}

/// Parse a `UserTweets` response into tweets plus the next cursor.
pub fn parse_user_tweets(root: &Value, username: &str) -> (Vec<Tweet>, Option<String>) {
    let list = instructions(root, "/data/user/result/timeline/timeline/instructions");
    parse_tweet_instructions(&list, username)
}

/// Parse a `SearchTimeline` response into author records plus next cursor.
///
/// Search answers with tweet entries; the candidate is the tweet's author.
pub fn parse_search_users(root: &Value) -> (Vec<UserRecord>, Option<String>) {
    let mut users = Vec::new();
    let mut next_cursor = None;

    for instruction in instructions(
        root,
        "/data/search_by_raw_query/search_timeline/timeline/instructions",
    ) {
        match instruction.get("type").and_then(Value::as_str) {
            Some("TimelineAddEntries") => {
                for entry in entries(&instruction) {
                    let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");
                    if entry_id.starts_with("cursor-bottom-") {
                        next_cursor = entry
                            .pointer("/content/value")
                            .and_then(Value::as_str)
                            .map(ToString::to_string);
                    } else if entry_id.starts_with("tweet-") {
                        if let Some(result) = entry.pointer(
                            "/content/itemContent/tweet_results/result/core/user_results/result",
                        ) {
                            if let Some(user) = parse_user_result(result) {
                                users.push(user);
                            }
                        }
                    }
                }
            }
            Some("TimelineReplaceEntry") => {
                if next_cursor.is_none() {
                    let entry_id = instruction
                        .pointer("/entry/entryId")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    if entry_id.starts_with("cursor-bottom-") {
                        next_cursor = instruction
                            .pointer("/entry/content/value")
                            .and_then(Value::as_str)
                            .map(ToString::to_string);
                    }
                }
            }
            _ => {}
        }
    }

    (users, next_cursor)
}

/// Walk one timeline instruction list for `user-` entries plus the cursor.
pub fn parse_user_instructions(instruction_list: &[Value]) -> (Vec<UserRecord>, Option<String>) {
    let mut users = Vec::new();
    let mut next_cursor = None;

    for instruction in instruction_list {
        if instruction.get("type").and_then(Value::as_str) != Some("TimelineAddEntries") {
            continue;
        }
        for entry in entries(instruction) {
            let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");
            if entry_id.starts_with("user-") {
                if let Some(result) = entry.pointer("/content/itemContent/user_results/result") {
                    if let Some(user) = parse_user_result(result) {
                        users.push(user);
                    }
                }
            } else if entry_id.starts_with("cursor-bottom-") {
                next_cursor = entry
                    .pointer("/content/value")
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
            }
        }
    }

    (users, next_cursor)
}

/// Parse a `Following` response into records plus the next cursor.
pub fn parse_followings(root: &Value) -> (Vec<UserRecord>, Option<String>) {
    let list = instructions(root, "/data/user/result/timeline/timeline/instructions");
    parse_user_instructions(&list)
}

fn instructions(root: &Value, pointer: &str) -> Vec<Value> {
    root.pointer(pointer)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn entries(instruction: &Value) -> Vec<Value> {
    instruction
        .get("entries")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}
