//! Shared test fixtures: a local STOMP broker stub and a recording transport.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use price_stream::{ConnectionState, SubscriptionManager, Transport};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Price update for Samsung Electronics as the backend sends it.
pub const SAMSUNG_JSON: &str = r#"{"stockCode":"005930","stockName":"삼성전자","currentPrice":75000,"changePrice":1500,"changeRate":2.04,"volume":25678432,"timestamp":1700000000000}"#;

/// Generous bound for anything that should happen "soon".
pub const WAIT: Duration = Duration::from_secs(5);

/// MESSAGE frame carrying `body` on a price topic.
pub fn price_message(subscription_id: &str, stock_code: &str, body: &str) -> String {
    format!(
        "MESSAGE\nsubscription:{subscription_id}\ndestination:/topic/price/{stock_code}\n\
         message-id:{subscription_id}-1\ncontent-type:application/json\n\n{body}\0"
    )
}

// =============================================================================
// STOMP Broker Stub
// =============================================================================

enum Command {
    Frame(String),
    Close,
}

/// Minimal STOMP broker on a local WebSocket.
///
/// Answers CONNECT with CONNECTED (heart-beating off) and records every
/// other frame. Connections are served one after another.
pub struct StompStub {
    /// `ws://` URL of the endpoint.
    pub url: String,
    frames: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedSender<Command>,
    connections: std::sync::Arc<AtomicUsize>,
}

impl StompStub {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/websocket", listener.local_addr().unwrap());

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel();
        let connections = std::sync::Arc::new(AtomicUsize::new(0));
        let accepted = std::sync::Arc::clone(&connections);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let (mut write, mut read) = ws.split();

                loop {
                    tokio::select! {
                        command = commands_rx.recv() => match command {
                            Some(Command::Frame(frame)) => {
                                if write.send(Message::Text(frame.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(Command::Close) => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                            None => return,
                        },
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let text = text.as_str().to_owned();
                                if text.starts_with("CONNECT\n") || text.starts_with("STOMP\n") {
                                    let reply = "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0";
                                    if write.send(Message::Text(reply.into())).await.is_err() {
                                        break;
                                    }
                                }
                                let _ = frames_tx.send(text);
                            }
                            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
        });

        Self {
            url,
            frames,
            commands,
            connections,
        }
    }

    /// Next non-heart-beat frame received from the client.
    pub async fn next_frame(&mut self) -> String {
        loop {
            let frame = timeout(WAIT, self.frames.recv())
                .await
                .expect("client frame expected")
                .expect("stub stopped");
            if !frame.trim().is_empty() {
                return frame;
            }
        }
    }

    /// Next frame, asserting its command.
    pub async fn expect_command(&mut self, command: &str) -> String {
        let frame = self.next_frame().await;
        assert!(
            frame.starts_with(&format!("{command}\n")),
            "expected {command}, got {frame:?}"
        );
        frame
    }

    /// Push a raw frame to the connected client.
    pub fn push(&self, frame: impl Into<String>) {
        self.commands.send(Command::Frame(frame.into())).unwrap();
    }

    /// Close the current connection from the server side.
    pub fn close_connection(&self) {
        self.commands.send(Command::Close).unwrap();
    }

    /// Number of WebSocket connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Recording Transport
// =============================================================================

/// Transport fake that records frames and lifecycle calls.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl RecordingTransport {
    /// Frames sent so far with the given command.
    pub fn sent(&self, command: &str) -> Vec<String> {
        let prefix = format!("{command}\n");
        self.frames
            .lock()
            .iter()
            .filter(|f| f.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Number of `open` calls.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn send(&self, frame: String) {
        self.frames.lock().push(frame);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// State Helpers
// =============================================================================

/// Stream connection state transitions into a channel.
pub fn watch_states(manager: &SubscriptionManager) -> mpsc::UnboundedReceiver<ConnectionState> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = manager.on_connection_state_change(move |state| {
        let _ = tx.send(state);
    });
    // Dropping the handle leaves the listener registered
    drop(handle);
    rx
}

/// Wait until `target` is reported.
pub async fn wait_for_state(
    states: &mut mpsc::UnboundedReceiver<ConnectionState>,
    target: ConnectionState,
) {
    timeout(WAIT, async {
        while let Some(state) = states.recv().await {
            if state == target {
                return;
            }
        }
        panic!("state channel closed before {target}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target}"));
}
