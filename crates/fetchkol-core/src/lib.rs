/// Core library for the fetchkol multi-platform social-data fetcher.
///
/// Contains the fetch-orchestration engine: the durable task pipeline,
/// the credential lease manager, the distributed rate limiter, the
/// per-platform fetch strategies, and the similar-user aggregator.
pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod queue;
pub mod ratelimit;
pub mod storage;
pub mod task;
pub mod worker;

pub use error::*;

/// Returns the version of the fetchkol-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
