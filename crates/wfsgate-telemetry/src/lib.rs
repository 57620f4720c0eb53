//! Observability for the wfsgate WFS gateway.
//!
//! This crate provides:
//! - Structured JSON (or pretty) logging through `tracing`
//! - A Prometheus metrics registry and text exposition
//!
//! # Usage
//!
//! ```ignore
//! use wfsgate_telemetry::{Telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::new().with_log_level("info");
//! let telemetry = Telemetry::init(config)?;
//! let metrics = telemetry.metrics_clone();
//! ```

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;
pub use metrics::{MetricsRegistry, PROMETHEUS_CONTENT_TYPE};

use std::sync::Arc;
use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// Main telemetry handle.
///
/// Holds the metrics registry shared by the gateway components.
pub struct Telemetry {
    config: TelemetryConfig,
    metrics: Arc<MetricsRegistry>,
}

impl Telemetry {
    /// Initialize logging and the metrics registry.
    pub fn init(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        logging::init_logging(&config)?;
        Ok(Self::init_without_logging(config))
    }

    /// Initialize telemetry without setting up logging.
    ///
    /// Use this when logging is already initialized (e.g., in tests).
    pub fn init_without_logging(config: TelemetryConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Get the telemetry configuration.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Get a cloned Arc reference to the metrics registry.
    pub fn metrics_clone(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Render metrics in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        self.metrics.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "wfsgate");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_config_builder() {
        let config = TelemetryConfig::new()
            .with_service_name("wfsgate-test")
            .with_log_level("debug")
            .with_log_format(LogFormat::Pretty);

        assert_eq!(config.service_name, "wfsgate-test");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_telemetry_init_without_logging() {
        let telemetry = Telemetry::init_without_logging(TelemetryConfig::default());
        telemetry.metrics().record_request("GET", "/health", 200, 0.001);
        assert!(telemetry
            .render_prometheus()
            .contains("wfsgate_requests_total"));
    }
}
