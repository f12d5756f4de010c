//! fetchkol server binary.
//!
//! Starts the HTTP intake surface and an in-process worker dispatcher over
//! the shared work queue. Horizontal scale comes from running more
//! processes against disjoint queue partitions.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fetchkol_core::config::Config;
use fetchkol_core::coordinator::Coordinator;
use fetchkol_core::queue::memory_queue;
use fetchkol_core::ratelimit::MemoryRateLimitStore;
use fetchkol_core::storage;
use fetchkol_core::worker::Dispatcher;
use fetchkol_server::state::AppState;

/// fetchkol — multi-platform social-data fetcher.
#[derive(Parser)]
#[command(name = "fetchkol-server", version, about)]
struct Cli {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Path to the YAML configuration file. Overrides FETCHER_CONFIG.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load()?,
    };

    tracing::info!(
        host = %cli.host,
        port = cli.port,
        db = %config.database.url,
        "starting fetchkol server"
    );

    let pool = storage::init_db(&config.database.url).await?;

    let (queue, source) = memory_queue(config.queue.capacity);
    let queue = Arc::new(queue);

    let store = Arc::new(MemoryRateLimitStore::new());
    let dispatcher = Dispatcher::new(config.clone(), pool.clone(), store);
    tokio::spawn(async move {
        dispatcher.run(source).await;
    });

    let state = Arc::new(AppState {
        coordinator: Coordinator::new(pool.clone(), queue.clone()),
        db: pool,
        queue,
    });

    let app = fetchkol_server::build_router(state);
    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port)).await?;
    tracing::info!("listening on http://{}:{}", cli.host, cli.port);
    axum::serve(listener, app).await?;

    Ok(())
}
