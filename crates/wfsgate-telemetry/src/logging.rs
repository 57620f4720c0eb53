//! Structured logging with JSON output.
//!
//! Every gateway event is a `tracing` event carrying an `event` field with one
//! of the names in [`events`], plus key/value context.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// Gateway is starting up.
    pub const STARTUP: &str = "startup";

    /// Gateway is shutting down.
    pub const SHUTDOWN: &str = "shutdown";

    /// Gateway is listening on a port.
    pub const LISTENING: &str = "listening";

    /// The layer store was (re)parsed after a modification-time change.
    pub const LAYER_STORE_RELOADED: &str = "layer_store_reloaded";

    /// The layer store could not be read or parsed.
    pub const LAYER_STORE_UNAVAILABLE: &str = "layer_store_unavailable";

    /// An outbound URL was rejected by the SSRF policy.
    pub const SSRF_REJECTED: &str = "ssrf_rejected";

    /// An upstream call is being retried.
    pub const UPSTREAM_RETRY: &str = "upstream_retry";

    /// An upstream call failed for good.
    pub const UPSTREAM_ERROR: &str = "upstream_error";

    /// An OAuth2 access token was obtained.
    pub const TOKEN_REFRESHED: &str = "token_refreshed";

    /// An OAuth2 token request failed.
    pub const TOKEN_REFRESH_FAILED: &str = "token_refresh_failed";

    /// Request has been completed.
    pub const REQUEST_COMPLETED: &str = "request_completed";

    /// Request validation failed.
    pub const VALIDATION_FAILURE: &str = "validation_failure";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_shutdown {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SHUTDOWN,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_layer_store_reloaded {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LAYER_STORE_RELOADED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_layer_store_unavailable {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::LAYER_STORE_UNAVAILABLE,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_ssrf_rejected {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::SSRF_REJECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_upstream_retry {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::UPSTREAM_RETRY,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_upstream_error {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::UPSTREAM_ERROR,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_token_refreshed {
    ($($field:tt)*) => {
        tracing::debug!(
            event = $crate::logging::events::TOKEN_REFRESHED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_token_refresh_failed {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::TOKEN_REFRESH_FAILED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_request_completed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::REQUEST_COMPLETED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_validation_failure {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::VALIDATION_FAILURE,
            $($field)*
        )
    };
}
