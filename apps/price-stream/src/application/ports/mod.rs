//! Port Interfaces
//!
//! Contracts between the subscription manager and the outside world,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: the single socket the manager owns and writes frames to
//!
//! ## Driver Ports (Inbound)
//!
//! - `TransportEvent`: socket lifecycle and inbound text, fed back into
//!   `SubscriptionManager::handle_event`

/// Event reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket is open; the STOMP handshake may start.
    Opened,
    /// Inbound text payload (one or more STOMP frames, or a heart-beat).
    Message(String),
    /// Socket closed, gracefully or not.
    Closed,
    /// Socket-level failure.
    Error(String),
}

/// Outbound half of the connection.
///
/// Implementations must not block: `open` starts connecting in the
/// background, `send` queues a frame, and `close` tears the session down.
/// Lifecycle is reported back through [`TransportEvent`]s.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Start a session. A no-op while one is already live.
    fn open(&self);

    /// Queue a text frame on the live session.
    fn send(&self, frame: String);

    /// Close the session and stop any reconnection.
    fn close(&self);
}
