//! Stream Configuration Settings
//!
//! Configuration for the price stream client, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::StompSessionSettings;

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default STOMP endpoint path (raw WebSocket endpoint of a SockJS server).
pub const DEFAULT_WS_PATH: &str = "/ws/websocket";

/// STOMP protocol settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompSettings {
    /// Versions offered in the CONNECT frame.
    pub accept_version: String,
    /// Interval at which the client sends heart-beats (zero = never).
    pub heartbeat_outgoing: Duration,
    /// Interval at which the client wants heart-beats (zero = never).
    pub heartbeat_incoming: Duration,
}

impl Default for StompSettings {
    fn default() -> Self {
        Self {
            accept_version: "1.1,1.2".to_string(),
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
        }
    }
}

impl StompSettings {
    /// Value of the CONNECT `heart-beat` header.
    #[must_use]
    pub fn heartbeat_header(&self) -> String {
        format!(
            "{},{}",
            self.heartbeat_outgoing.as_millis(),
            self.heartbeat_incoming.as_millis()
        )
    }

    /// Session settings handed to the subscription manager.
    #[must_use]
    pub fn session_settings(&self) -> StompSessionSettings {
        StompSessionSettings {
            accept_version: self.accept_version.clone(),
            heartbeat: self.heartbeat_header(),
        }
    }
}

/// Reconnection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Attempts after a failure before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(3000),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// WebSocket URL of the STOMP endpoint (`ws://` or `wss://`).
    pub websocket_url: String,
    /// STOMP protocol settings.
    pub stomp: StompSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            websocket_url: "ws://localhost:8080/ws/websocket".to_string(),
            stomp: StompSettings::default(),
            reconnect: ReconnectSettings::default(),
            metrics_port: 0,
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// base URL has an unsupported scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`StreamConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = lookup("PRICE_STREAM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let ws_path = lookup("PRICE_STREAM_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_string());

        let stomp = StompSettings {
            accept_version: lookup("PRICE_STREAM_ACCEPT_VERSION")
                .unwrap_or(defaults.stomp.accept_version),
            heartbeat_outgoing: parse_duration_millis(
                &lookup,
                "PRICE_STREAM_HEARTBEAT_OUTGOING_MS",
                defaults.stomp.heartbeat_outgoing,
            )?,
            heartbeat_incoming: parse_duration_millis(
                &lookup,
                "PRICE_STREAM_HEARTBEAT_INCOMING_MS",
                defaults.stomp.heartbeat_incoming,
            )?,
        };

        let reconnect = ReconnectSettings {
            max_attempts: parse_value(
                &lookup,
                "PRICE_STREAM_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            )?,
            delay: parse_duration_millis(
                &lookup,
                "PRICE_STREAM_RECONNECT_DELAY_MS",
                defaults.reconnect.delay,
            )?,
        };

        Ok(Self {
            websocket_url: websocket_url(&base_url, &ws_path)?,
            stomp,
            reconnect,
            metrics_port: parse_value(&lookup, "PRICE_STREAM_METRICS_PORT", defaults.metrics_port)?,
        })
    }
}

/// Build the WebSocket endpoint URL from a base URL and a path.
///
/// `http://` becomes `ws://` and `https://` becomes `wss://`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUrl`] for any other scheme.
pub fn websocket_url(base_url: &str, path: &str) -> Result<String, ConfigError> {
    let base = base_url.trim().trim_end_matches('/');

    let rewritten = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(ConfigError::InvalidUrl(base_url.to_string()));
    };

    if path.is_empty() {
        return Ok(rewritten);
    }

    let separator = if path.starts_with('/') { "" } else { "/" };
    Ok(format!("{rewritten}{separator}{path}"))
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable is set but malformed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Base URL scheme is not http(s) or ws(s).
    #[error("unsupported base URL: {0}")]
    InvalidUrl(String),
}

fn parse_value<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw,
    })
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default_millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_value(lookup, key, default_millis).map(Duration::from_millis)
}
