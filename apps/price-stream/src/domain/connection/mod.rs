//! Connection State
//!
//! The four-state lifecycle of the single STOMP session.
//!
//! ```text
//!  disconnected ──connect()──► connecting ──CONNECTED──► connected
//!       ▲                          │                        │
//!       └──────── socket closed ◄──┴──── ERROR / failure ───┴──► error
//! ```

use std::fmt;

/// State of the STOMP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session; the next subscription opens one.
    #[default]
    Disconnected,
    /// Socket opening or CONNECT sent, waiting for CONNECTED.
    Connecting,
    /// CONNECTED received; wire subscriptions are live.
    Connected,
    /// Transport failure or STOMP ERROR frame.
    Error,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Check if wire subscriptions can be sent.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric code for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Error => 3.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
