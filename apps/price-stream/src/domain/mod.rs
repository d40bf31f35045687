//! Domain Layer - Core price streaming types.
//!
//! This layer holds the price payload, the connection lifecycle, and the
//! subscription bookkeeping. Nothing here performs I/O.

/// Connection lifecycle states.
pub mod connection;

/// Korean market session helpers.
pub mod market_session;

/// Stock price payload and destination naming.
pub mod price;

/// Topic and subscriber bookkeeping.
pub mod subscription;
