//! Gateway configuration sourced from `WFS_*` environment variables.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::url_builder::WfsVersion;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} is required when WFS_AUTH_MODE={mode}")]
    Missing { key: &'static str, mode: &'static str },
}

/// Retry schedule for transient upstream failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before retry N (0-based).
    pub delays: Vec<Duration>,
    /// Used once `delays` is exhausted.
    pub fallback_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.delays
            .get(attempt)
            .copied()
            .unwrap_or(self.fallback_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delays: vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ],
            fallback_delay: Duration::from_millis(5000),
        }
    }
}

/// OAuth2 client-credentials settings.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuth2Config {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    /// Fail the request instead of continuing anonymously when no token
    /// can be obtained.
    pub fail_closed: bool,
}

impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("fail_closed", &self.fail_closed)
            .finish()
    }
}

/// How the gateway authenticates to upstream WFS servers.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum AuthConfig {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    OAuth2(OAuth2Config),
}

impl AuthConfig {
    pub fn mode(&self) -> &'static str {
        match self {
            AuthConfig::None => "none",
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::OAuth2(_) => "oauth2",
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::None => f.write_str("None"),
            AuthConfig::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            AuthConfig::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"[REDACTED]")
                .finish(),
            AuthConfig::OAuth2(cfg) => f.debug_tuple("OAuth2").field(cfg).finish(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Origin used to resolve internal, relative layer URLs.
    pub base_url: String,
    pub fetch_timeout: Duration,
    pub transaction_timeout: Duration,
    pub retry: RetryPolicy,
    pub default_limit: u32,
    pub max_limit: u32,
    pub max_response_bytes: u64,
    pub max_transaction_bytes: u64,
    pub default_version: WfsVersion,
    /// Write both the 1.x and 2.x parameter names into GetFeature URLs.
    pub compat_params: bool,
    /// Exact host names or `*.domain` wildcards. Empty means no allowlist.
    pub allowed_hosts: Vec<String>,
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3002".to_string(),
            fetch_timeout: Duration::from_millis(30_000),
            transaction_timeout: Duration::from_millis(60_000),
            retry: RetryPolicy::default(),
            default_limit: 1000,
            max_limit: 10_000,
            max_response_bytes: 300 * 1024 * 1024,
            max_transaction_bytes: 10 * 1024 * 1024,
            default_version: WfsVersion::V1_1_0,
            compat_params: false,
            allowed_hosts: Vec::new(),
            auth: AuthConfig::None,
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset or blank keys use defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let base_url = get("WFS_BASE_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);

        let fetch_timeout = match get("WFS_FETCH_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_num("WFS_FETCH_TIMEOUT_MS", &v)?),
            None => defaults.fetch_timeout,
        };
        let transaction_timeout = match get("WFS_TRANSACTION_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_num("WFS_TRANSACTION_TIMEOUT_MS", &v)?),
            None => defaults.transaction_timeout,
        };

        let mut retry = defaults.retry;
        if let Some(v) = get("WFS_MAX_RETRIES") {
            retry.max_retries = parse_num("WFS_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("WFS_RETRY_DELAYS_MS") {
            retry.delays = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_num::<u64>("WFS_RETRY_DELAYS_MS", s).map(Duration::from_millis))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = get("WFS_RETRY_FALLBACK_DELAY_MS") {
            retry.fallback_delay =
                Duration::from_millis(parse_num("WFS_RETRY_FALLBACK_DELAY_MS", &v)?);
        }

        let default_limit = match get("WFS_DEFAULT_LIMIT") {
            Some(v) => parse_num("WFS_DEFAULT_LIMIT", &v)?,
            None => defaults.default_limit,
        };
        let max_limit = match get("WFS_MAX_LIMIT") {
            Some(v) => parse_num("WFS_MAX_LIMIT", &v)?,
            None => defaults.max_limit,
        };
        if default_limit > max_limit {
            return Err(ConfigError::Invalid {
                key: "WFS_DEFAULT_LIMIT",
                value: default_limit.to_string(),
                reason: format!("exceeds WFS_MAX_LIMIT ({max_limit})"),
            });
        }

        let max_response_bytes = match get("WFS_MAX_RESPONSE_BYTES") {
            Some(v) => parse_num("WFS_MAX_RESPONSE_BYTES", &v)?,
            None => defaults.max_response_bytes,
        };
        let max_transaction_bytes = match get("WFS_MAX_TRANSACTION_BYTES") {
            Some(v) => parse_num("WFS_MAX_TRANSACTION_BYTES", &v)?,
            None => defaults.max_transaction_bytes,
        };

        let default_version = match get("WFS_DEFAULT_VERSION") {
            Some(v) => WfsVersion::parse(&v).ok_or(ConfigError::Invalid {
                key: "WFS_DEFAULT_VERSION",
                value: v.clone(),
                reason: "expected 1.0.0, 1.1.0, 2.0.0 or 2.0.2".to_string(),
            })?,
            None => defaults.default_version,
        };

        let compat_params = match get("WFS_VERSION_COMPAT") {
            Some(v) => parse_bool("WFS_VERSION_COMPAT", &v)?,
            None => false,
        };

        let allowed_hosts = get("WFS_ALLOWED_HOSTS")
            .map(|v| {
                v.split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let auth = Self::auth_from_lookup(&get)?;

        Ok(Self {
            base_url,
            fetch_timeout,
            transaction_timeout,
            retry,
            default_limit,
            max_limit,
            max_response_bytes,
            max_transaction_bytes,
            default_version,
            compat_params,
            allowed_hosts,
            auth,
        })
    }

    fn auth_from_lookup<F>(get: &F) -> Result<AuthConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = get("WFS_AUTH_MODE").unwrap_or_else(|| "none".to_string());
        let require = |key: &'static str, mode: &'static str| {
            get(key).ok_or(ConfigError::Missing { key, mode })
        };

        match mode.to_lowercase().as_str() {
            "none" => Ok(AuthConfig::None),
            "basic" => Ok(AuthConfig::Basic {
                username: require("WFS_AUTH_USERNAME", "basic")?,
                password: require("WFS_AUTH_PASSWORD", "basic")?,
            }),
            "bearer" => Ok(AuthConfig::Bearer {
                token: require("WFS_AUTH_TOKEN", "bearer")?,
            }),
            "oauth2" => Ok(AuthConfig::OAuth2(OAuth2Config {
                token_url: require("WFS_OAUTH2_TOKEN_URL", "oauth2")?,
                client_id: require("WFS_OAUTH2_CLIENT_ID", "oauth2")?,
                client_secret: require("WFS_OAUTH2_CLIENT_SECRET", "oauth2")?,
                scope: get("WFS_OAUTH2_SCOPE"),
                fail_closed: match get("WFS_OAUTH2_FAIL_CLOSED") {
                    Some(v) => parse_bool("WFS_OAUTH2_FAIL_CLOSED", &v)?,
                    None => false,
                },
            })),
            _ => Err(ConfigError::Invalid {
                key: "WFS_AUTH_MODE",
                value: mode,
                reason: "expected none, basic, bearer or oauth2".to_string(),
            }),
        }
    }
}

fn parse_num<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
