//! Client configuration resolved from the process environment.
//!
//! # Responsibility
//! - Resolve REST and push endpoints, timeouts and reconnect behavior.
//! - Fall back to localhost development endpoints when unset.
//!
//! # Invariants
//! - Blank values behave exactly like unset values.
//! - Endpoint URLs are validated once here, not at request time.

use crate::push::reconnect::ReconnectPolicy;
use crate::push::TASKS_TOPIC;
use reqwest::Url;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const API_URL_ENV: &str = "DESKLIGHT_API_URL";
pub const WS_URL_ENV: &str = "DESKLIGHT_WS_URL";
pub const REQUEST_TIMEOUT_ENV: &str = "DESKLIGHT_REQUEST_TIMEOUT_SECS";
pub const NOTIFICATION_TTL_ENV: &str = "DESKLIGHT_NOTIFICATION_TTL_SECS";
pub const RECONNECT_ENV: &str = "DESKLIGHT_RECONNECT";

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_NOTIFICATION_TTL_SECS: u64 = 5;
/// Upper bound for every seconds-valued setting (one day).
pub const MAX_SECONDS: u64 = 86_400;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidUrl {
        key: &'static str,
        value: String,
        reason: String,
    },
    InvalidSeconds {
        key: &'static str,
        value: String,
    },
    InvalidSwitch {
        key: &'static str,
        value: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl { key, value, reason } => {
                write!(f, "{key} is not a valid endpoint `{value}`: {reason}")
            }
            Self::InvalidSeconds { key, value } => {
                write!(
                    f,
                    "{key} must be between 1 and {MAX_SECONDS} seconds, got `{value}`"
                )
            }
            Self::InvalidSwitch { key, value } => {
                write!(f, "{key} must be on|off, got `{value}`")
            }
        }
    }
}

impl Error for ConfigError {}

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// REST base URL, without trailing slash.
    pub api_url: String,
    /// STOMP-over-WebSocket endpoint.
    pub ws_url: String,
    /// Push topic carrying task lifecycle events.
    pub topic: String,
    pub request_timeout: Duration,
    pub notification_ttl: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            topic: TASKS_TOPIC.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            notification_ttl: Duration::from_secs(DEFAULT_NOTIFICATION_TTL_SECS),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    /// - Returns an error when a set value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to
    /// its raw value.
    ///
    /// # Errors
    /// - Returns an error when a set value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(value) = read(API_URL_ENV) {
            config.api_url = parse_endpoint(API_URL_ENV, &value, &["http", "https"])?;
        }
        if let Some(value) = read(WS_URL_ENV) {
            config.ws_url = parse_endpoint(WS_URL_ENV, &value, &["ws", "wss"])?;
        }
        if let Some(value) = read(REQUEST_TIMEOUT_ENV) {
            config.request_timeout = parse_seconds(REQUEST_TIMEOUT_ENV, &value)?;
        }
        if let Some(value) = read(NOTIFICATION_TTL_ENV) {
            config.notification_ttl = parse_seconds(NOTIFICATION_TTL_ENV, &value)?;
        }
        if let Some(value) = read(RECONNECT_ENV) {
            config.reconnect = parse_reconnect(&value)?;
        }
        Ok(config)
    }

    /// Overrides the REST base URL.
    ///
    /// # Errors
    /// - Returns an error when `value` is not an http(s) URL.
    pub fn with_api_url(mut self, value: &str) -> Result<Self, ConfigError> {
        self.api_url = parse_endpoint(API_URL_ENV, value.trim(), &["http", "https"])?;
        Ok(self)
    }

    /// Overrides the push endpoint.
    ///
    /// # Errors
    /// - Returns an error when `value` is not a ws(s) URL.
    pub fn with_ws_url(mut self, value: &str) -> Result<Self, ConfigError> {
        self.ws_url = parse_endpoint(WS_URL_ENV, value.trim(), &["ws", "wss"])?;
        Ok(self)
    }
}

fn parse_endpoint(
    key: &'static str,
    value: &str,
    schemes: &[&str],
) -> Result<String, ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::InvalidUrl {
        key,
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            key,
            value: value.to_string(),
            reason: format!("expected scheme {}", schemes.join("|")),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_seconds(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(seconds) if (1..=MAX_SECONDS).contains(&seconds) => Ok(Duration::from_secs(seconds)),
        _ => Err(ConfigError::InvalidSeconds {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_reconnect(value: &str) -> Result<ReconnectPolicy, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "backoff" => Ok(ReconnectPolicy::default()),
        "off" | "false" | "0" | "never" => Ok(ReconnectPolicy::Never),
        _ => Err(ConfigError::InvalidSwitch {
            key: RECONNECT_ENV,
            value: value.to_string(),
        }),
    }
}
