//! Prometheus exposition.

use axum::{extract::State, http::header, response::IntoResponse};
use wfsgate_telemetry::PROMETHEUS_CONTENT_TYPE;

use super::router::AppState;

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render(),
    )
}
