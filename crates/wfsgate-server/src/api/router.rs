//! Axum router configuration.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use wfsgate::{ServiceError, WfsGateway};
use wfsgate_telemetry::{log_request_completed, log_validation_failure, MetricsRegistry};

use super::{features, health, layers, metrics, transaction};
use crate::error::ApiError;

/// Header carrying the request id, generated when the client sends none.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<WfsGateway>,
    pub metrics: Arc<MetricsRegistry>,
    /// Trusted header naming the calling user.
    pub user_header: HeaderName,
    /// Filter layers by the caller's group memberships.
    pub wash_content: bool,
}

impl AppState {
    pub fn user(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.user_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Turn a gateway error into a response, counting validation failures.
    pub fn reject(&self, route: &str, err: ServiceError) -> ApiError {
        if err.is_validation() {
            self.metrics.record_validation_failure(route, &err.message);
            log_validation_failure!(route = route, reason = %err.message, "request rejected");
        }
        ApiError(err)
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/wfst", get(layers::list_layers))
        .route("/wfst/{id}/features", get(features::get_features))
        .route("/wfst/{id}/transaction", post(transaction::transaction))
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Records per-route request metrics and tags the response with a request id.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed();
    state
        .metrics
        .record_request(&method, &route, status, elapsed.as_secs_f64());
    log_request_completed!(
        request_id = %request_id,
        method = %method,
        route = %route,
        status = status,
        duration_ms = elapsed.as_millis() as u64,
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
