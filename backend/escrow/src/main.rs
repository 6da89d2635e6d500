//! Escrow service entry point.
//!
//! Starts the trust worker, which enforces project deadlines in the
//! background, and serves the read-only transparency API on the same pool.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use escrow::api::{self, ApiState};
use escrow::config::Config;
use escrow::db;
use escrow::trust_worker::{self, WorkerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Optional .env file.
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        "Expense approvals are funded from {:?}",
        config.expense_funding_source
    );

    let pool = db::init_pool(&config.database_url, config.max_connections).await?;
    let shutdown = CancellationToken::new();

    // ─── Trust worker ─────────────────────────────────────
    let worker_state = Arc::new(WorkerState {
        pool: pool.clone(),
        interval: config.trust_worker_interval(),
    });
    let worker = tokio::spawn(trust_worker::run(worker_state, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(ApiState { pool }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    worker.await?;
    Ok(())
}
