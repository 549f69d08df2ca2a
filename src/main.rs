// =============================================================================
// clutchwatch-sync — Main Entry Point
// =============================================================================
//
// Boots the shared PgPool, builds AppState, spawns the Periodic Controller
// on a fixed-interval tick loop, then serves the HTTP API. Controller ticks
// are serialized by construction: the loop awaits one tick to completion
// before sleeping for the next interval, matching the "no intra-tick
// concurrency" scheduling model.
// =============================================================================

mod api;
mod app_state;
mod cache_writer;
mod config;
mod controller;
mod controller_state;
mod decision;
mod discord;
mod error;
mod exclusions;
mod notifications;
mod session;
mod snapshot_writer;
mod types;
mod upstream;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("clutchwatch-sync starting up");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.supabase_url)
        .await?;

    info!(bind_addr = %config.bind_addr, cron_interval_minutes = config.decision.cron_interval_minutes, "configuration loaded");

    let bind_addr = config.bind_addr.clone();
    let cron_interval_minutes = config.decision.cron_interval_minutes;

    let state = Arc::new(AppState::new(config, pool));

    // ── Periodic Controller tick loop ────────────────────────────────────
    let controller_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
            cron_interval_minutes as u64 * 60,
        ));
        loop {
            interval.tick().await;
            match controller_state.controller.tick().await {
                Ok(outcome) => {
                    controller_state.increment_version();
                    info!(
                        should_save = outcome.decision.should_save,
                        saved = outcome.saved,
                        alert_sent = outcome.alert_sent,
                        "controller tick complete"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "controller tick failed, skipping this interval");
                }
            }
        }
    });

    // ── HTTP API ──────────────────────────────────────────────────────────
    let app = api::routes::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "API server failed");
        return Err(e.into());
    }

    Ok(())
}
