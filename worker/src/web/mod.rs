//! Metrics web server.
//!
//! Serves `GET /metrics` for Prometheus and `GET /health` for liveness
//! checks next to the worker's consumer loop.

pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use handlers::{health, render_metrics, AppState, HealthResponse};

/// How often histogram buckets are folded for rendering.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener. Failing to bind is a startup error.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {addr}"))?;

    info!(address = %addr, "metrics_server_listening");
    Ok(listener)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let prometheus = state.prometheus.clone();
    let upkeep = tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPKEEP_INTERVAL);
        loop {
            interval.tick().await;
            prometheus.run_upkeep();
        }
    });

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Metrics server error");

    upkeep.abort();
    served
}
