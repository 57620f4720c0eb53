//! Prometheus metrics registry and its text exposition, served at `/metrics`.

use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

/// Content-Type of the Prometheus text format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Duration histogram buckets (in seconds).
/// Upstream WFS servers are slow; the range stretches to a full minute.
const DURATION_BUCKETS: [f64; 14] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Feature count buckets.
const FEATURE_BUCKETS: [f64; 7] = [0.0, 1.0, 10.0, 100.0, 1000.0, 5000.0, 10000.0];

/// Request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    pub route: String,
    pub status: u16,
}

/// Upstream call labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    pub operation: String,
    pub outcome: String,
}

/// Labels keyed only by operation.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
}

/// Outcome labels (reloads, token refreshes).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Layer labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LayerLabels {
    pub layer: String,
}

/// Validation failure labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ValidationLabels {
    pub route: String,
    pub reason: String,
}

/// Metrics registry holding all wfsgate metrics.
pub struct MetricsRegistry {
    /// The prometheus-client registry for encoding.
    pub registry: Registry,

    // Inbound request metrics
    pub requests_total: Family<RequestLabels, Counter>,
    pub request_duration_seconds: Family<RequestLabels, Histogram>,
    pub validation_failures_total: Family<ValidationLabels, Counter>,

    // Upstream metrics
    pub upstream_requests_total: Family<UpstreamLabels, Counter>,
    pub upstream_duration_seconds: Family<OperationLabels, Histogram>,
    pub upstream_retries_total: Family<OperationLabels, Counter>,

    // Layer store metrics
    pub layer_store_reloads_total: Family<OutcomeLabels, Counter>,
    pub layers_loaded: Gauge,

    // Auth metrics
    pub token_refreshes_total: Family<OutcomeLabels, Counter>,

    // Translation metrics
    pub features_returned: Family<LayerLabels, Histogram>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "wfsgate_requests_total",
            "Total number of HTTP requests processed",
            requests_total.clone(),
        );

        let request_duration_seconds =
            Family::<RequestLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().cloned())
            });
        registry.register(
            "wfsgate_request_duration_seconds",
            "HTTP request duration in seconds",
            request_duration_seconds.clone(),
        );

        let validation_failures_total = Family::<ValidationLabels, Counter>::default();
        registry.register(
            "wfsgate_validation_failures_total",
            "Total number of request validation failures",
            validation_failures_total.clone(),
        );

        let upstream_requests_total = Family::<UpstreamLabels, Counter>::default();
        registry.register(
            "wfsgate_upstream_requests_total",
            "Total number of upstream WFS calls by outcome",
            upstream_requests_total.clone(),
        );

        let upstream_duration_seconds =
            Family::<OperationLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().cloned())
            });
        registry.register(
            "wfsgate_upstream_duration_seconds",
            "Upstream WFS call duration in seconds",
            upstream_duration_seconds.clone(),
        );

        let upstream_retries_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "wfsgate_upstream_retries_total",
            "Total number of upstream retry attempts",
            upstream_retries_total.clone(),
        );

        let layer_store_reloads_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "wfsgate_layer_store_reloads_total",
            "Total number of layer store reloads",
            layer_store_reloads_total.clone(),
        );

        let layers_loaded = Gauge::default();
        registry.register(
            "wfsgate_layers_loaded",
            "Number of layers in the current layer store snapshot",
            layers_loaded.clone(),
        );

        let token_refreshes_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "wfsgate_token_refreshes_total",
            "Total number of OAuth2 token requests",
            token_refreshes_total.clone(),
        );

        let features_returned = Family::<LayerLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(FEATURE_BUCKETS.iter().cloned())
        });
        registry.register(
            "wfsgate_features_returned",
            "Number of features returned per GetFeature call",
            features_returned.clone(),
        );

        Self {
            registry,
            requests_total,
            request_duration_seconds,
            validation_failures_total,
            upstream_requests_total,
            upstream_duration_seconds,
            upstream_retries_total,
            layer_store_reloads_total,
            layers_loaded,
            token_refreshes_total,
            features_returned,
        }
    }

    /// Record a completed inbound request.
    pub fn record_request(&self, method: &str, route: &str, status: u16, duration_secs: f64) {
        let labels = RequestLabels {
            method: method.to_string(),
            route: route.to_string(),
            status,
        };

        self.requests_total.get_or_create(&labels).inc();
        self.request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a validation failure.
    pub fn record_validation_failure(&self, route: &str, reason: &str) {
        let labels = ValidationLabels {
            route: route.to_string(),
            reason: reason.to_string(),
        };
        self.validation_failures_total.get_or_create(&labels).inc();
    }

    /// Record one upstream call (a single attempt).
    pub fn record_upstream(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.upstream_requests_total
            .get_or_create(&UpstreamLabels {
                operation: operation.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.upstream_duration_seconds
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .observe(duration_secs);
    }

    /// Record an upstream retry.
    pub fn record_upstream_retry(&self, operation: &str) {
        self.upstream_retries_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    /// Record a layer store reload. `layers` is the snapshot size on success.
    pub fn record_layer_store_reload(&self, success: bool, layers: usize) {
        let outcome = if success { "success" } else { "failure" };
        self.layer_store_reloads_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
        self.layers_loaded
            .set(if success { layers as i64 } else { 0 });
    }

    /// Record an OAuth2 token request.
    pub fn record_token_refresh(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.token_refreshes_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record the size of a translated feature collection.
    pub fn record_features_returned(&self, layer: &str, count: usize) {
        self.features_returned
            .get_or_create(&LayerLabels {
                layer: layer.to_string(),
            })
            .observe(count as f64);
    }

    /// Every family in Prometheus text format.
    pub fn render(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
