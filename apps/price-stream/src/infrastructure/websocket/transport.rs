//! WebSocket Transport
//!
//! [`Transport`] implementation over `tokio-tungstenite`. Each `open` starts
//! one background session task that connects, forwards outbound frames,
//! reports inbound text, keeps STOMP heart-beats flowing and reconnects
//! according to the [`ReconnectPolicy`].
//!
//! # Event Sequence
//!
//! ```text
//! open() ─► connect ─ok─► Opened ─► Message* ─► Closed ─► (delay) ─► connect ...
//!              │
//!              └─err─► Error ─► (delay) ─► connect ... ─► Closed (gave up)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{
    HEARTBEAT_PAYLOAD, HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState,
};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Transport, TransportEvent};
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::stomp::{StompCommand, StompFrame, decode_frame};

/// Capacity of the transport event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// URL is not a `ws://` or `wss://` URL.
    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// Transport was created outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,

    /// No inbound traffic within the negotiated heart-beat window.
    #[error("heart-beat timeout")]
    HeartbeatTimeout,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heart-beat intervals offered to the server.
    pub heartbeat: HeartbeatConfig,
}

impl TransportConfig {
    /// Create a configuration with default reconnect and heart-beat settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let config = StreamConfig::default();
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
            heartbeat: HeartbeatConfig::from_stomp_settings(&config.stomp),
        }
    }

    /// Create configuration from the client configuration.
    #[must_use]
    pub fn from_stream_config(config: &StreamConfig) -> Self {
        Self {
            url: config.websocket_url.clone(),
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
            heartbeat: HeartbeatConfig::from_stomp_settings(&config.stomp),
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

struct Session {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl Session {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// WebSocket transport owning at most one live session.
pub struct WebSocketTransport {
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    runtime: Handle,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.config.url)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Create a transport and the receiver for its events.
    ///
    /// Must be called from within a tokio runtime; sessions are spawned on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL scheme is not `ws`/`wss` or no runtime
    /// is available.
    pub fn new(
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(config.url));
        }

        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Ok((
            Self {
                config,
                events,
                runtime,
                session: Mutex::new(None),
            },
            events_rx,
        ))
    }

    /// Check if a session task is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.lock().as_ref().is_some_and(Session::is_running)
    }
}

impl Transport for WebSocketTransport {
    fn open(&self) {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(Session::is_running) {
            tracing::debug!("Session already running");
            return;
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));

        let task = SessionTask {
            config: self.config.clone(),
            events: self.events.clone(),
            outbound_rx,
            cancel: cancel.clone(),
            running: Arc::clone(&running),
        };
        self.runtime.spawn(task.run());

        *session = Some(Session {
            outbound,
            cancel,
            running,
        });
    }

    fn send(&self, frame: String) {
        let session = self.session.lock();
        match session.as_ref() {
            Some(session) if session.is_running() => {
                if session.outbound.send(frame).is_err() {
                    tracing::debug!("Session task gone, frame dropped");
                }
            }
            _ => tracing::debug!("No live session, frame dropped"),
        }
    }

    fn close(&self) {
        if let Some(session) = self.session.lock().take() {
            session.cancel.cancel();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct SessionTask {
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl SessionTask {
    async fn run(mut self) {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            tracing::info!(url = %self.config.url, "Connecting to price stream");

            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    tracing::info!(url = %self.config.url, "WebSocket connected");
                    reconnect_policy.reset();
                    self.discard_stale_frames();

                    if !self.emit(TransportEvent::Opened).await {
                        break;
                    }

                    let outcome = self.drive(ws_stream).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }

                    match outcome {
                        Ok(()) => tracing::info!("WebSocket session ended"),
                        Err(e) => tracing::warn!(error = %e, "WebSocket connection lost"),
                    }
                    if !self.emit(TransportEvent::Closed).await {
                        break;
                    }
                }
                Err(e) => {
                    let error = TransportError::from(e);
                    tracing::warn!(error = %error, "WebSocket connection failed");
                    if !self.emit(TransportEvent::Error(error.to_string())).await {
                        break;
                    }
                }
            }

            let Some(delay) = reconnect_policy.next_delay() else {
                let error =
                    TransportError::MaxReconnectAttemptsExceeded(reconnect_policy.attempt_count());
                tracing::error!(error = %error, "Giving up on price stream");
                self.running.store(false, Ordering::SeqCst);
                let _ = self.emit(TransportEvent::Closed).await;
                return;
            };

            let attempt = reconnect_policy.attempt_count();
            metrics::record_reconnect_attempt();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to price stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Transport closed during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Pump one connected socket until it fails or the session is closed.
    async fn drive(&mut self, ws_stream: WsStream) -> Result<(), TransportError> {
        let (mut write, mut read) = ws_stream.split();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        let mut heartbeat_started = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    // Flush what was queued before close (e.g. DISCONNECT)
                    while let Ok(frame) = self.outbound_rx.try_recv() {
                        write.send(Message::Text(frame.into())).await?;
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                frame = self.outbound_rx.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    write.send(Message::Text(frame.into())).await?;
                }
                Some(event) = heartbeat_rx.recv() => {
                    match event {
                        HeartbeatEvent::Send => {
                            write.send(Message::Text(HEARTBEAT_PAYLOAD.into())).await?;
                        }
                        HeartbeatEvent::Timeout => {
                            return Err(TransportError::HeartbeatTimeout);
                        }
                    }
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping non-UTF-8 binary message");
                                heartbeat_state.record_inbound();
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(TransportError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ping/pong; tungstenite answers pings itself
                            heartbeat_state.record_inbound();
                            continue;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(TransportError::ConnectionClosed);
                        }
                    };

                    heartbeat_state.record_inbound();
                    if !heartbeat_started
                        && let Some(connected) = connected_frame(&text)
                    {
                        heartbeat_started = true;
                        self.start_heartbeat(&connected, &heartbeat_state, &heartbeat_tx, &heartbeat_cancel);
                    }

                    if !self.emit(TransportEvent::Message(text)).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn start_heartbeat(
        &self,
        connected: &StompFrame,
        state: &Arc<HeartbeatState>,
        event_tx: &mpsc::Sender<HeartbeatEvent>,
        cancel: &CancellationToken,
    ) {
        let server_header = connected.header("heart-beat");
        let negotiated = self.config.heartbeat.negotiate(server_header);

        if negotiated.is_disabled() {
            tracing::debug!(server = server_header.unwrap_or("none"), "Heart-beating disabled");
            return;
        }

        tracing::debug!(
            outgoing_ms = u64::try_from(negotiated.outgoing.as_millis()).unwrap_or(u64::MAX),
            incoming_ms = u64::try_from(negotiated.incoming.as_millis()).unwrap_or(u64::MAX),
            "Heart-beating negotiated"
        );
        let monitor =
            HeartbeatMonitor::new(negotiated, Arc::clone(state), event_tx.clone(), cancel.clone());
        tokio::spawn(monitor.run());
    }

    fn discard_stale_frames(&mut self) {
        let mut discarded = 0_usize;
        while self.outbound_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded frames queued for a previous connection");
        }
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Event receiver dropped, stopping session");
            return false;
        }
        true
    }
}

/// First CONNECTED frame carried by a socket message, if any.
fn connected_frame(text: &str) -> Option<StompFrame> {
    text.split_terminator('\0')
        .filter_map(|chunk| decode_frame(chunk).ok().flatten())
        .find(|frame| frame.command == StompCommand::Connected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_non_websocket_url() {
        let result = WebSocketTransport::new(TransportConfig::new("http://localhost:8080"));
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[test]
    fn requires_runtime() {
        let result = WebSocketTransport::new(TransportConfig::new("ws://localhost:8080"));
        assert!(matches!(result, Err(TransportError::NoRuntime)));
    }

    #[test]
    fn connected_frame_found_after_leading_eols() {
        let frame = connected_frame("\n\r\nCONNECTED\nversion:1.2\nheart-beat:0,5000\n\n\0").unwrap();
        assert_eq!(frame.header("heart-beat"), Some("0,5000"));
    }

    #[test]
    fn connected_frame_found_in_batched_message() {
        let text = "\n\0CONNECTED\nheart-beat:1000,1000\n\n\0MESSAGE\nsubscription:sub-1\n\n{}\0";
        let frame = connected_frame(text).unwrap();
        assert_eq!(frame.header("heart-beat"), Some("1000,1000"));
    }

    #[test]
    fn other_frames_are_not_connected() {
        assert!(connected_frame("MESSAGE\nsubscription:sub-1\n\n{}\0").is_none());
        assert!(connected_frame("\n").is_none());
    }

    #[tokio::test]
    async fn send_without_session_is_dropped() {
        let (transport, _events) =
            WebSocketTransport::new(TransportConfig::new("ws://127.0.0.1:9")).unwrap();
        transport.send("DISCONNECT\n\n\0".to_string());
        assert!(!transport.is_active());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut config = TransportConfig::new("ws://127.0.0.1:9/ws");
        config.reconnect = ReconnectConfig::from_settings(&crate::infrastructure::config::ReconnectSettings {
            max_attempts: 1,
            delay: Duration::from_millis(10),
        });
        let (transport, mut events) = WebSocketTransport::new(config).unwrap();

        transport.open();
        transport.open();

        let mut received = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            let done = event == TransportEvent::Closed;
            received.push(event);
            if done {
                break;
            }
        }

        assert!(matches!(received.as_slice(), [
            TransportEvent::Error(_),
            TransportEvent::Error(_),
            TransportEvent::Closed
        ]));
        assert!(!transport.is_active());
    }
}
