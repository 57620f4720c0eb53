//! Resilient HTTP client for upstream WFS calls.
//!
//! One pooled `reqwest::Client` shared by every request. Each attempt is
//! raced against a timer, transient failures are retried on the configured
//! schedule, and response bodies are read under a hard byte ceiling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, Method, Response, StatusCode};
use wfsgate_telemetry::{log_upstream_error, log_upstream_retry, MetricsRegistry};

use crate::config::RetryPolicy;
use crate::error::{Result, ServiceError};

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// Idle connection timeout.
    pub pool_idle_timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Per-attempt timeout used by [`UpstreamClient::fetch_with_retry`].
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// An outbound request. Cheap to clone, so it can be replayed on retry.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    /// Metrics label, e.g. `get_feature` or `transaction`.
    pub operation: &'static str,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>, operation: &'static str) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            operation,
        }
    }

    pub fn post(url: impl Into<String>, body: Bytes, operation: &'static str) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HashMap::new(),
            body: Some(body),
            operation,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// HTTP client with timeout, retry and byte-cap discipline.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamClientConfig, metrics: Arc<MetricsRegistry>) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ServiceError::service(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            retry: config.retry,
            fetch_timeout: config.fetch_timeout,
            metrics,
        })
    }

    /// The shared pooled client, for callers that build their own requests.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// One attempt bounded by `timeout`. On expiry the in-flight request is
    /// dropped and a 504 is returned; transport failures become 502.
    pub async fn fetch_with_timeout(
        &self,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> Result<Response> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, builder.send()).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(response)) => {
                let status = response.status();
                let label = if status.is_success() {
                    "success".to_string()
                } else {
                    format!("status_{}", status.as_u16())
                };
                self.metrics
                    .record_upstream(request.operation, &label, elapsed);
                Ok(response)
            }
            Ok(Err(e)) if e.is_builder() => {
                self.metrics
                    .record_upstream(request.operation, "invalid_request", elapsed);
                log_upstream_error!(
                    operation = request.operation,
                    url = %request.url,
                    error = %e,
                    "invalid upstream request"
                );
                Err(ServiceError::upstream("Invalid upstream request", 500))
            }
            Ok(Err(e)) => {
                self.metrics
                    .record_upstream(request.operation, "transport_error", elapsed);
                tracing::debug!(
                    operation = request.operation,
                    error = %e,
                    "upstream transport error"
                );
                Err(ServiceError::upstream("Upstream request failed", 502))
            }
            Err(_) => {
                self.metrics
                    .record_upstream(request.operation, "timeout", elapsed);
                Err(ServiceError::upstream("Request timeout", 504)
                    .with_detail("timeoutMs", timeout.as_millis() as u64))
            }
        }
    }

    /// Send with the configured per-attempt timeout, retrying 502/503/504
    /// responses and transport failures. The last 5xx response is returned
    /// as-is once retries are exhausted.
    pub async fn fetch_with_retry(&self, request: &UpstreamRequest) -> Result<Response> {
        let timeout = self.fetch_timeout;
        let max_retries = self.retry.max_retries as usize;
        let mut attempt = 0usize;

        loop {
            let outcome = self.fetch_with_timeout(request, timeout).await;

            let reason = match &outcome {
                Ok(response) if is_retryable_status(response.status()) => {
                    Some(format!("status {}", response.status().as_u16()))
                }
                Err(err) if is_retryable_error(err) => Some(err.message.clone()),
                _ => None,
            };
            let Some(reason) = reason else {
                return outcome;
            };

            if attempt >= max_retries {
                log_upstream_error!(
                    operation = request.operation,
                    url = %request.url,
                    attempts = attempt + 1,
                    reason = %reason,
                    "upstream retries exhausted"
                );
                return outcome;
            }

            let delay = self.retry.delay_for(attempt);
            log_upstream_retry!(
                operation = request.operation,
                url = %request.url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "retrying upstream request"
            );
            self.metrics.record_upstream_retry(request.operation);

            // Release the connection before sleeping.
            drop(outcome);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 502..=504)
}

fn is_retryable_error(err: &ServiceError) -> bool {
    matches!(err.status, 502 | 504)
}

/// Read a response body as text, never buffering more than `max_bytes`.
///
/// An advertised `Content-Length` above the limit fails before any body
/// byte is read; otherwise the stream is aborted as soon as the running
/// total crosses the limit.
pub async fn read_text_with_limit(response: Response, max_bytes: u64) -> Result<String> {
    let bytes = read_bytes_with_limit(response, max_bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn read_bytes_with_limit(response: Response, max_bytes: u64) -> Result<Vec<u8>> {
    if let Some(length) = response.content_length() {
        if length > max_bytes {
            return Err(too_large(max_bytes).with_detail("contentLength", length));
        }
    }

    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::debug!(error = %e, "upstream body stream error");
            ServiceError::upstream("Upstream request failed", 502)
        })?;
        total += chunk.len() as u64;
        if total > max_bytes {
            return Err(too_large(max_bytes));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer)
}

fn too_large(max_bytes: u64) -> ServiceError {
    ServiceError::upstream("Response too large", 413).with_detail("maxBytes", max_bytes)
}
