//! Shared HTTP plumbing for the fetch strategies.
//!
//! Every outbound platform call runs through a client built here: 30 s total
//! timeout, optional proxy, rustls. Responses are funneled through
//! [`read_json`], which enforces the common failure contract: non-2xx is a
//! failure, 429 is rate limiting, and a JSON endpoint answering with another
//! content type is treated as a transient upstream fault.

use std::time::Duration;

use serde_json::Value;

use crate::error::FetchError;

/// Total timeout applied to every outbound platform call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the reqwest client used by a strategy.
pub fn build_client(proxy_url: Option<&str>) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);

    if let Some(url) = proxy_url {
        let proxy = reqwest::Proxy::all(url).map_err(|e| FetchError::Config {
            message: format!("invalid proxy url '{url}': {e}"),
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|source| FetchError::Network { source })
}

/// Map a non-success status and body into the fetch error taxonomy.
pub fn status_error(status: u16, body: &str) -> FetchError {
    match status {
        429 => FetchError::RateLimited,
        404 => FetchError::NotFound {
            message: truncate(body, 200),
        },
        _ => FetchError::Transient {
            status,
            message: truncate(body, 200),
        },
    }
}

/// Consume a response expected to carry JSON.
///
/// Checks status, then content type, then parses. The suspension-redirect
/// check belongs to the platform strategy (it needs the final URL) and must
/// run before calling this.
pub async fn read_json(response: reqwest::Response) -> Result<Value, FetchError> {
    let status = response.status().as_u16();

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }

    if !content_type.contains("application/json") {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Transient {
            status,
            message: format!("content-type is not JSON: {content_type}: {}", truncate(&body, 120)),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|source| FetchError::Network { source })
}

/// Consume a response expected to carry HTML, for the scrape paths.
pub async fn read_html(response: reqwest::Response) -> Result<String, FetchError> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    response
        .text()
        .await
        .map_err(|source| FetchError::Network { source })
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// Map a reqwest transport error, distinguishing timeouts.
pub fn transport_error(source: reqwest::Error) -> FetchError {
    FetchError::Network { source }
}
