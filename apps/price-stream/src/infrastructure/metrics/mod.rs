//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: STOMP frames received by command, decode failures
//! - **Delivery**: Price updates handed to subscribers, callback panics
//! - **Connection**: Connection state, transport errors, reconnects
//! - **Subscriptions**: Active wire subscriptions
//!
//! Recording functions are no-ops until [`init_metrics`] installs the
//! exporter.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::ConnectionState;
use crate::infrastructure::stomp::StompCommand;

static METRICS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the Prometheus exporter with an HTTP listener on `port`.
///
/// A port of 0 leaves metrics disabled. Returns whether the exporter is
/// running; calling again after a successful install is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<bool, BuildError> {
    if port == 0 {
        tracing::debug!("Prometheus exporter disabled");
        return Ok(false);
    }

    if METRICS_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(true);
    }

    if let Err(e) = PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
    {
        METRICS_INSTALLED.store(false, Ordering::SeqCst);
        return Err(e);
    }

    register_metrics();
    tracing::info!(port, "Prometheus exporter listening");
    Ok(true)
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_stream_frames_received_total",
        "Total STOMP frames received by command"
    );
    describe_counter!(
        "price_stream_updates_delivered_total",
        "Total price updates delivered to subscriber callbacks"
    );
    describe_counter!(
        "price_stream_decode_errors_total",
        "Total frames or payloads dropped as undecodable"
    );
    describe_counter!(
        "price_stream_callback_panics_total",
        "Total subscriber callbacks that panicked"
    );
    describe_counter!(
        "price_stream_transport_errors_total",
        "Total transport-level errors"
    );
    describe_counter!(
        "price_stream_reconnects_total",
        "Total WebSocket reconnection attempts"
    );

    describe_gauge!(
        "price_stream_active_topics",
        "Topics with a live wire subscription"
    );
    describe_gauge!(
        "price_stream_connection_state",
        "Connection state (0=disconnected, 1=connecting, 2=connected, 3=error)"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound STOMP frame.
pub fn record_frame_received(command: &StompCommand) {
    let label = match command {
        StompCommand::Unknown(_) => "unknown".to_string(),
        known => known.as_str().to_lowercase(),
    };
    counter!("price_stream_frames_received_total", "command" => label).increment(1);
}

/// Record price updates handed to subscribers.
pub fn record_updates_delivered(count: usize) {
    counter!("price_stream_updates_delivered_total").increment(count as u64);
}

/// Record a frame or payload that failed to decode.
pub fn record_decode_error() {
    counter!("price_stream_decode_errors_total").increment(1);
}

/// Record a subscriber callback panic.
pub fn record_callback_panic() {
    counter!("price_stream_callback_panics_total").increment(1);
}

/// Record a transport error.
pub fn record_transport_error() {
    counter!("price_stream_transport_errors_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("price_stream_reconnects_total").increment(1);
}

/// Update the active topic count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_topics(count: usize) {
    gauge!("price_stream_active_topics").set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_stream_connection_state").set(state.as_gauge());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_port_disables_exporter() {
        assert!(!init_metrics(0).unwrap());
    }

    #[test]
    fn recording_without_exporter_is_noop() {
        record_frame_received(&StompCommand::Message);
        record_frame_received(&StompCommand::Unknown("RECEIPT".to_string()));
        record_updates_delivered(3);
        set_active_topics(2);
        set_connection_state(ConnectionState::Connected);
    }
}
