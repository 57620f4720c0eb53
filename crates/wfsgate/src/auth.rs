//! Upstream authentication headers: none, basic, bearer or OAuth2 client
//! credentials with a cached, single-flight token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use wfsgate_telemetry::{log_token_refresh_failed, log_token_refreshed, MetricsRegistry};

use crate::config::{AuthConfig, OAuth2Config};
use crate::error::{Result, ServiceError};

/// Tokens are treated as expired this long before the server says so.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Upper bound on a cached token's lifetime.
const MAX_EXPIRES_IN: u64 = 86_400;

/// A cached OAuth2 access token.
#[derive(Clone)]
pub struct AuthToken {
    pub value: String,
    pub expires_at: Instant,
}

impl AuthToken {
    fn from_response(response: TokenResponse, now: Instant) -> Self {
        let secs = response
            .expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN)
            .min(MAX_EXPIRES_IN);
        let lifetime = Duration::from_secs(secs).saturating_sub(EXPIRY_MARGIN);
        Self {
            value: response.access_token,
            expires_at: now.checked_add(lifetime).unwrap_or(now),
        }
    }

    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Builds per-request auth headers for upstream WFS servers.
pub struct Authenticator {
    config: AuthConfig,
    client: Client,
    /// Held across the token request, so concurrent callers wait for a
    /// single refresh instead of issuing their own.
    token: Mutex<Option<AuthToken>>,
    token_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl Authenticator {
    pub fn new(
        config: AuthConfig,
        client: Client,
        token_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            client,
            token: Mutex::new(None),
            token_timeout,
            metrics,
        }
    }

    pub fn mode(&self) -> &'static str {
        self.config.mode()
    }

    pub fn is_oauth2(&self) -> bool {
        matches!(self.config, AuthConfig::OAuth2(_))
    }

    /// Headers to attach to an upstream request.
    ///
    /// OAuth2 failures fail open (no header) unless `fail_closed` is set,
    /// in which case the call fails with a 502.
    pub async fn headers(&self) -> Result<HashMap<String, String>> {
        let mut headers = HashMap::new();
        match &self.config {
            AuthConfig::None => {}
            AuthConfig::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                headers.insert("Authorization".to_string(), format!("Basic {encoded}"));
            }
            AuthConfig::Bearer { token } => {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            AuthConfig::OAuth2(oauth) => {
                if let Some(token) = self.oauth2_token(oauth).await? {
                    headers.insert("Authorization".to_string(), format!("Bearer {token}"));
                }
            }
        }
        Ok(headers)
    }

    /// Drop the cached token, e.g. after the upstream answered 401.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn oauth2_token(&self, oauth: &OAuth2Config) -> Result<Option<String>> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            return Ok(Some(token.value.clone()));
        }

        match self.request_token(oauth).await {
            Ok(token) => {
                self.metrics.record_token_refresh(true);
                log_token_refreshed!(
                    token_url = %oauth.token_url,
                    expires_in_secs = token
                        .expires_at
                        .saturating_duration_since(Instant::now())
                        .as_secs(),
                    "obtained OAuth2 access token"
                );
                let value = token.value.clone();
                *cached = Some(token);
                Ok(Some(value))
            }
            Err(reason) => {
                self.metrics.record_token_refresh(false);
                *cached = None;
                log_token_refresh_failed!(
                    token_url = %oauth.token_url,
                    reason = %reason,
                    fail_closed = oauth.fail_closed,
                    "OAuth2 token request failed"
                );
                if oauth.fail_closed {
                    Err(ServiceError::upstream("Upstream authentication failed", 502))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn request_token(&self, oauth: &OAuth2Config) -> std::result::Result<AuthToken, String> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
        ];
        if let Some(scope) = &oauth.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(&oauth.token_url)
            .form(&form)
            .timeout(self.token_timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("token endpoint returned {status}"));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid token response: {e}"))?;
        if body.access_token.is_empty() {
            return Err("token response without access_token".to_string());
        }

        Ok(AuthToken::from_response(body, Instant::now()))
    }
}
