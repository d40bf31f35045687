//! STOMP Heart-beating
//!
//! Negotiates heart-beat intervals from the CONNECT/CONNECTED exchange and
//! monitors connection health. An outgoing heart-beat is a single EOL on the
//! socket; any inbound traffic counts as an incoming heart-beat.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StompSettings;

/// Payload of an outgoing heart-beat.
pub const HEARTBEAT_PAYLOAD: &str = "\n";

/// Inbound silence is tolerated for this many incoming intervals.
const INCOMING_GRACE_FACTOR: u32 = 2;

/// Negotiated heart-beat intervals. A zero duration disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatConfig {
    /// How often the client sends a heart-beat.
    pub outgoing: Duration,
    /// How often the server promised to send one.
    pub incoming: Duration,
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Client-side intervals, as offered in CONNECT.
    #[must_use]
    pub const fn from_stomp_settings(settings: &StompSettings) -> Self {
        Self {
            outgoing: settings.heartbeat_outgoing,
            incoming: settings.heartbeat_incoming,
        }
    }

    /// Combine the client offer with the server's `heart-beat` header.
    ///
    /// A direction is active only when both sides ask for it; the larger
    /// interval wins. A missing or malformed header disables heart-beating.
    #[must_use]
    pub fn negotiate(&self, server_header: Option<&str>) -> Self {
        let Some((server_outgoing, server_incoming)) = server_header.and_then(parse_header) else {
            return Self::default();
        };

        Self {
            outgoing: combine(self.outgoing, server_incoming),
            incoming: combine(self.incoming, server_outgoing),
        }
    }

    /// Check if neither direction is active.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.outgoing.is_zero() && self.incoming.is_zero()
    }

    /// Maximum inbound silence before the connection is declared dead.
    #[must_use]
    pub fn incoming_timeout(&self) -> Option<Duration> {
        (!self.incoming.is_zero()).then(|| self.incoming * INCOMING_GRACE_FACTOR)
    }

    fn tick_interval(&self) -> Duration {
        match (self.outgoing.is_zero(), self.incoming.is_zero()) {
            (false, false) => self.outgoing.min(self.incoming),
            (false, true) => self.outgoing,
            _ => self.incoming,
        }
    }
}

fn parse_header(value: &str) -> Option<(Duration, Duration)> {
    let (cx, cy) = value.split_once(',')?;
    let cx = cx.trim().parse::<u64>().ok()?;
    let cy = cy.trim().parse::<u64>().ok()?;
    Some((Duration::from_millis(cx), Duration::from_millis(cy)))
}

fn combine(client: Duration, server: Duration) -> Duration {
    if client.is_zero() || server.is_zero() {
        Duration::ZERO
    } else {
        client.max(server)
    }
}

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send an EOL heart-beat.
    Send,
    /// Nothing arrived within the incoming timeout.
    Timeout,
}

/// Inbound activity shared between the socket reader and the monitor.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that something arrived on the socket.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Heartbeat monitor for one socket connection.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the channel closes, or a timeout is reported.
    pub async fn run(self) {
        if self.config.is_disabled() {
            return;
        }

        let period = self.config.tick_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_sent = Instant::now();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check(&mut last_sent).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn check(&self, last_sent: &mut Instant) -> Result<(), ()> {
        if let Some(timeout) = self.config.incoming_timeout() {
            let silence = self.state.time_since_inbound();
            if silence > timeout {
                tracing::warn!(
                    silence_ms = u64::try_from(silence.as_millis()).unwrap_or(u64::MAX),
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Heart-beat timeout"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return Err(());
            }
        }

        if !self.config.outgoing.is_zero() && last_sent.elapsed() >= self.config.outgoing {
            if self.event_tx.send(HeartbeatEvent::Send).await.is_err() {
                tracing::debug!("Event channel closed, stopping heartbeat");
                return Err(());
            }
            *last_sent = Instant::now();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const CLIENT: HeartbeatConfig =
        HeartbeatConfig::new(Duration::from_millis(10_000), Duration::from_millis(10_000));

    #[test_case(Some("0,0"), 0, 0 ; "server declines")]
    #[test_case(Some("5000,20000"), 20_000, 10_000 ; "larger interval wins")]
    #[test_case(Some("0,4000"), 10_000, 0 ; "server never sends")]
    #[test_case(Some("garbage"), 0, 0 ; "malformed header")]
    #[test_case(None, 0, 0 ; "no header")]
    fn negotiation(header: Option<&str>, outgoing_ms: u64, incoming_ms: u64) {
        let negotiated = CLIENT.negotiate(header);
        assert_eq!(negotiated.outgoing, Duration::from_millis(outgoing_ms));
        assert_eq!(negotiated.incoming, Duration::from_millis(incoming_ms));
    }

    #[test]
    fn client_zero_disables_direction() {
        let client = HeartbeatConfig::new(Duration::ZERO, Duration::from_secs(10));
        let negotiated = client.negotiate(Some("10000,10000"));
        assert!(negotiated.outgoing.is_zero());
        assert_eq!(negotiated.incoming_timeout(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn state_records_inbound() {
        let state = HeartbeatState::new();
        *state.last_inbound.write() = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap();
        assert!(state.time_since_inbound() >= Duration::from_secs(5));

        state.record_inbound();
        assert!(state.time_since_inbound() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn monitor_requests_heartbeats() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::ZERO);
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let monitor = HeartbeatMonitor::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone());

        let handle = tokio::spawn(monitor.run());

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::Send);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn monitor_detects_silence() {
        let config = HeartbeatConfig::new(Duration::ZERO, Duration::from_millis(20));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let monitor = HeartbeatMonitor::new(config, state, event_tx, CancellationToken::new());

        let handle = tokio::spawn(monitor.run());

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::Timeout);

        // Monitor exits after reporting
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("monitor should exit")
            .expect("task should complete");
    }

    #[tokio::test]
    async fn disabled_monitor_returns_immediately() {
        let (event_tx, _event_rx) = mpsc::channel(1);
        let monitor = HeartbeatMonitor::new(
            HeartbeatConfig::default(),
            Arc::new(HeartbeatState::new()),
            event_tx,
            CancellationToken::new(),
        );

        let result = tokio::time::timeout(Duration::from_millis(100), monitor.run()).await;
        assert!(result.is_ok());
    }
}
