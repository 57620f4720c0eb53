//! Error taxonomy for the gateway.
//!
//! Every failure that reaches a caller is a [`ServiceError`]: a kind, an HTTP
//! status, a human-readable message and an optional details map. Internal
//! error enums (`ConfigError`, `GmlError`) are converted at the façade boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Broad category of a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsafe input (400).
    Validation,
    /// Unknown layer id (404).
    NotFound,
    /// Upstream failure; status varies (413, 500, 502, 504).
    Upstream,
    /// Anything else (500).
    Service,
}

/// Error returned by gateway operations.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ServiceError {
    fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// 400 Bad Request.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, 400, message)
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, 404, message)
    }

    /// Upstream failure with an explicit status.
    pub fn upstream(message: impl Into<String>, status: u16) -> Self {
        Self::new(ErrorKind::Upstream, status, message)
    }

    /// 500 Internal Server Error.
    pub fn service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Service, 500, message)
    }

    /// Attach a request-specific detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_upstream(&self) -> bool {
        self.kind == ErrorKind::Upstream
    }

    /// JSON body served to clients: `{error, details?}`.
    ///
    /// No internal paths or backtraces end up here; only the message and
    /// whatever was attached with [`ServiceError::with_detail`].
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("error".into(), Value::String(self.message.clone()));
        if !self.details.is_empty() {
            body.insert("details".into(), Value::Object(self.details.clone()));
        }
        Value::Object(body)
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_statuses() {
        assert_eq!(ServiceError::validation("bad").status, 400);
        assert_eq!(ServiceError::not_found("missing").status, 404);
        assert_eq!(ServiceError::service("boom").status, 500);
        assert_eq!(ServiceError::upstream("Request timeout", 504).status, 504);
    }

    #[test]
    fn test_kind_predicates() {
        assert!(ServiceError::validation("x").is_validation());
        assert!(ServiceError::not_found("x").is_not_found());
        assert!(ServiceError::upstream("x", 502).is_upstream());
        assert!(!ServiceError::service("x").is_upstream());
    }

    #[test]
    fn test_body_without_details() {
        let body = ServiceError::not_found("Layer not found").to_body();
        assert_eq!(body, serde_json::json!({"error": "Layer not found"}));
    }

    #[test]
    fn test_body_with_details() {
        let err = ServiceError::validation("Transaction body too large")
            .with_detail("maxBytes", 10_485_760u64);
        let body = err.to_body();
        assert_eq!(body["error"], "Transaction body too large");
        assert_eq!(body["details"]["maxBytes"], 10_485_760u64);
    }

    #[test]
    fn test_display_is_message() {
        let err = ServiceError::upstream("Response too large", 413);
        assert_eq!(err.to_string(), "Response too large");
    }
}
