//! Distributed rate limiting.
//!
//! One bucket exists per `(provider, channel)` pair, keyed like
//! `twitter:rapid`. Bucket state is a single last-grant timestamp held in a
//! shared key-value store; the only operation is an atomic compare-and-set
//! that grants iff `now - last >= interval` and writes the new timestamp with
//! a TTL of twice the interval. The CAS is the sole piece of shared mutable
//! state between worker processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// Atomic last-grant store backing the limiter.
///
/// Implementations must make `try_acquire` atomic per key: read the last
/// grant, and iff `now_ms - last >= interval_ms`, write `now_ms` with an
/// expiry of `2 * interval_ms` and return `true`.
#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Attempt to take the next grant for `key`. Never blocks.
    async fn try_acquire(&self, key: &str, now_ms: u64, interval_ms: u64) -> bool;
}

/// In-process store for single-binary deployments and tests.
///
/// A shared-KV implementation (one worker fleet, one store) is a drop-in
/// impl of [`RateLimitStore`] with the same CAS contract.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    entries: Mutex<HashMap<String, GrantEntry>>,
}

struct GrantEntry {
    last_ms: u64,
    expires_at_ms: u64,
}

impl MemoryRateLimitStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn try_acquire(&self, key: &str, now_ms: u64, interval_ms: u64) -> bool {
        let mut entries = self.entries.lock().await;

        let last = entries
            .get(key)
            .filter(|entry| entry.expires_at_ms > now_ms)
            .map_or(0, |entry| entry.last_ms);

        if now_ms.saturating_sub(last) >= interval_ms {
            entries.insert(
                key.to_string(),
                GrantEntry {
                    last_ms: now_ms,
                    expires_at_ms: now_ms + 2 * interval_ms,
                },
            );
            true
        } else {
            false
        }
    }
}

/// Rate limiter for one bucket.
///
/// `acquire` spins on the store's CAS, sleeping half the grant interval
/// between attempts. Saturation therefore surfaces as backpressure: callers
/// simply run slower.
pub struct DistributedRateLimiter {
    store: Arc<dyn RateLimitStore>,
    key: String,
    interval_ms: u64,
}

impl DistributedRateLimiter {
    /// Create a limiter over `store` for `key` at `rate_per_sec`.
    pub fn new(store: Arc<dyn RateLimitStore>, key: impl Into<String>, rate_per_sec: f64) -> Self {
        let rate = if rate_per_sec > 0.0 { rate_per_sec } else { 1.0 };
        Self {
            store,
            key: format!("fetchkol:ratelimit:{}", key.into()),
            interval_ms: (1000.0 / rate) as u64,
        }
    }

    /// Block until this bucket grants a token.
    pub async fn acquire(&self) {
        loop {
            let now_ms = now_millis();
            if self.store.try_acquire(&self.key, now_ms, self.interval_ms).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(self.interval_ms / 2)).await;
        }
    }

    /// The bucket key, including the store namespace prefix.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
