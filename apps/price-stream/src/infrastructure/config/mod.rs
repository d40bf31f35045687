//! Configuration Module
//!
//! Environment-driven configuration for the price stream client.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_BASE_URL, DEFAULT_WS_PATH, ReconnectSettings, StompSettings,
    StreamConfig, websocket_url,
};
