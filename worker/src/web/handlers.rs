//! Scrape and health endpoint handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub prometheus: PrometheusHandle,
}

impl AppState {
    pub fn new(prometheus: PrometheusHandle) -> Self {
        Self { prometheus }
    }
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Prometheus text exposition of every registered metric.
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}
