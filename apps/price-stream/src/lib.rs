#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Stream - Real-time Stock Price Subscriptions
//!
//! A client that keeps a single STOMP-over-WebSocket connection to the
//! trading backend and multiplexes per-stock price subscriptions over it.
//! Any number of consumers may watch the same stock; the broker only ever
//! sees one wire subscription per stock.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types, no I/O
//!   - `price`: Price update payload and topic naming
//!   - `connection`: Connection lifecycle states
//!   - `subscription`: Topic → subscribers bookkeeping and pending queue
//!   - `market_session`: Korean market hours
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport contract and transport events
//!   - `services`: Subscription manager and reconnect-surviving watchlist
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stomp`: STOMP frame codec
//!   - `websocket`: WebSocket transport, reconnect policy, heart-beats
//!   - `config`: Environment configuration
//!   - `telemetry` / `metrics`: Tracing and Prometheus
//!
//! # Data Flow
//!
//! ```text
//!                        ┌─────────────────────┐
//!  subscribe("005930") ─►│                     │── SUBSCRIBE ──►┌───────────┐
//!  subscribe("005930") ─►│ SubscriptionManager │                │ WebSocket │◄─► backend
//!  subscribe("000660") ─►│                     │◄── MESSAGE ────│ Transport │
//!                        └─────────┬───────────┘                └───────────┘
//!                                  │ fan-out per topic
//!                                  ▼
//!                          subscriber callbacks
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::price::{StockCode, StockPriceUpdate};
pub use domain::subscription::SubscriptionStats;

// Application
pub use application::ports::{Transport, TransportEvent};
pub use application::services::{
    ListenerHandle, StompSessionSettings, Subscription, SubscriptionManager, Watchlist,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamConfig};

// Transport
pub use infrastructure::websocket::{TransportConfig, TransportError, WebSocketTransport};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
