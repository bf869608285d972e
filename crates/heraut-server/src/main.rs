//! # heraut-server
//!
//! A small ActivityPub instance built on `heraut-federation`.
//!
//! This binary provides:
//! - **Inbox** that runs every remote object through the handler dispatcher
//! - **Local accounts and statuses** with fan-out to home timelines
//! - **Outbox** delivery to remote inboxes
//! - **Remote actor lookup** through the actor cache
//! - **Per-IP rate limiting** in front of every route

mod api;
mod config;
mod error;
mod fetch;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use heraut_federation::Federation;
use heraut_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::fetch::{HttpActorFetcher, HttpDeliveryTransport};
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,heraut_server=debug,heraut_federation=debug")
        }))
        .init();

    let config = ServerConfig::from_env();
    info!(version = env!("CARGO_PKG_VERSION"), ?config, "Starting Héraut");

    let federation = Arc::new(build_federation(&config)?);
    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);
    spawn_rate_limit_sweeper(rate_limiter.clone());

    let http_addr = config.http_addr;
    let app_state = AppState {
        federation,
        rate_limiter,
        config: Arc::new(config),
    };

    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// Open the instance database and wire the engine to the HTTP collaborators.
fn build_federation(config: &ServerConfig) -> anyhow::Result<Federation> {
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let fetcher = Arc::new(HttpActorFetcher::new(config.fetch_timeout)?);
    let transport = Arc::new(HttpDeliveryTransport::new(config.delivery_timeout)?);
    Ok(Federation::new(
        db.into_shared(),
        fetcher,
        transport,
        config.federation_config(),
    )?)
}

/// Every 5 minutes, forget clients idle for more than 10.
fn spawn_rate_limit_sweeper(rate_limiter: RateLimiter) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(Duration::from_secs(600)).await;
        }
    });
}
