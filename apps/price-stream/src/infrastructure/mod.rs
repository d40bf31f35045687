//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the wire protocol, the concrete transport behind the
//! application's `Transport` port, and the ambient configuration, logging
//! and metrics plumbing.

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// STOMP 1.2 frame codec and subscription id generation.
pub mod stomp;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;

/// WebSocket transport with reconnection and heart-beating.
pub mod websocket;
