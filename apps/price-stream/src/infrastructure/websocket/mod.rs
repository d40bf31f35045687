//! WebSocket Transport Adapter
//!
//! Connects the subscription manager to the backend's STOMP endpoint.
//!
//! - `transport`: session task, outbound queue, event reporting
//! - `reconnect`: retry schedule between connection attempts
//! - `heartbeat`: STOMP heart-beat negotiation and liveness checks

pub mod heartbeat;
pub mod reconnect;
pub mod transport;

pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::{EVENT_CHANNEL_CAPACITY, TransportConfig, TransportError, WebSocketTransport};
