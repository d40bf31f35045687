//! Application Layer - Use cases and port definitions.
//!
//! This layer drives the STOMP session through the transport port and
//! routes inbound price frames to subscribers.

/// Port interfaces for the socket transport.
pub mod ports;

/// Subscription management service.
pub mod services;
