//! Subscription Manager
//!
//! Single point of control for the STOMP session and the
//! topic → subscribers mapping.
//!
//! # Locking
//!
//! All state sits behind one mutex. Transport calls are non-blocking and
//! are made while holding it, so frames leave in the same order as the
//! state changes that produced them. User callbacks and connection-state
//! listeners always run after the lock is released, over snapshots, so
//! they may call back into the manager.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Transport, TransportEvent};
use crate::domain::connection::ConnectionState;
use crate::domain::price::{StockCode, StockPriceUpdate, stock_code_from_destination};
use crate::domain::subscription::{
    PriceCallback, SubscriberId, SubscriberRecord, SubscriptionStats, TopicBook, WireChange,
};
use crate::infrastructure::metrics;
use crate::infrastructure::stomp::{
    StompCommand, StompFrame, SubscriptionIdGenerator, decode_frame, encode_connect,
    encode_disconnect, encode_subscribe, encode_unsubscribe,
};

/// Listener for connection state transitions.
pub type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

// =============================================================================
// Settings
// =============================================================================

/// STOMP session settings sent in the CONNECT frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompSessionSettings {
    /// `accept-version` header.
    pub accept_version: String,
    /// `heart-beat` header (`outgoing,incoming` in milliseconds).
    pub heartbeat: String,
}

impl Default for StompSessionSettings {
    fn default() -> Self {
        Self {
            accept_version: "1.1,1.2".to_string(),
            heartbeat: "10000,10000".to_string(),
        }
    }
}

// =============================================================================
// State
// =============================================================================

struct ManagerState {
    connection: ConnectionState,
    /// A session was opened and not explicitly closed.
    transport_active: bool,
    book: TopicBook,
    subscription_ids: SubscriptionIdGenerator,
    listeners: Vec<(u64, StateListener)>,
    next_listener_id: u64,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            transport_active: false,
            book: TopicBook::new(),
            subscription_ids: SubscriptionIdGenerator::new(),
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    /// Move to `next`, queueing listener notifications on a change.
    fn transition(&mut self, next: ConnectionState, notices: &mut Notices) {
        if self.connection == next {
            return;
        }

        tracing::info!(from = %self.connection, to = %next, "Connection state changed");
        self.connection = next;
        metrics::set_connection_state(next);

        let listeners = self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        notices.pending.push((next, listeners));
    }
}

/// State-change notifications collected under the lock, delivered after.
#[derive(Default)]
struct Notices {
    pending: Vec<(ConnectionState, Vec<StateListener>)>,
}

impl Notices {
    fn deliver(self) {
        for (state, listeners) in self.pending {
            for listener in listeners {
                if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                    tracing::error!(state = %state, "Connection state listener panicked");
                }
            }
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    settings: StompSessionSettings,
    state: Mutex<ManagerState>,
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Multiplexes per-stock price subscriptions over one STOMP connection.
///
/// Cloning is cheap; clones share the same session.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use price_stream::application::ports::Transport;
/// use price_stream::application::services::{StompSessionSettings, SubscriptionManager};
/// use price_stream::domain::connection::ConnectionState;
///
/// struct NullTransport;
///
/// impl Transport for NullTransport {
///     fn open(&self) {}
///     fn send(&self, _frame: String) {}
///     fn close(&self) {}
/// }
///
/// let manager = SubscriptionManager::create(Arc::new(NullTransport), StompSessionSettings::default());
///
/// // First subscription opens the connection
/// let subscription = manager.subscribe("005930", |update| println!("{}", update.current_price));
/// assert_eq!(manager.connection_state(), ConnectionState::Connecting);
///
/// // Last subscriber leaving tears the connection down
/// subscription.unsubscribe();
/// assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
/// ```
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("state", &self.connection_state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Create a manager owning `transport`. Nothing is opened until the
    /// first subscription.
    #[must_use]
    pub fn create(transport: Arc<dyn Transport>, settings: StompSessionSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                state: Mutex::new(ManagerState::new()),
            }),
        }
    }

    /// Disconnect and drop every connection-state listener.
    pub fn dispose(&self) {
        self.disconnect();
        self.inner.state.lock().listeners.clear();
        tracing::debug!("Subscription manager disposed");
    }

    /// Subscribe to live price updates for `topic` (a stock code).
    ///
    /// Opens the connection if it is down. Updates start flowing once the
    /// wire subscription is established.
    pub fn subscribe<F>(&self, topic: impl Into<StockCode>, on_update: F) -> Subscription
    where
        F: Fn(&StockPriceUpdate) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let callback: PriceCallback = Arc::new(on_update);
        let subscriber_id = self.inner.subscribe(&topic, callback);

        Subscription {
            manager: Arc::downgrade(&self.inner),
            topic,
            subscriber_id,
            active: AtomicBool::new(true),
        }
    }

    /// Open the connection. A no-op unless disconnected.
    pub fn connect(&self) {
        let mut notices = Notices::default();
        {
            let mut state = self.inner.state.lock();
            self.inner.connect_locked(&mut state, &mut notices);
        }
        notices.deliver();
    }

    /// Close the connection and drop all topics and pending subscribers.
    pub fn disconnect(&self) {
        let mut notices = Notices::default();
        {
            let mut state = self.inner.state.lock();
            self.inner.disconnect_locked(&mut state, &mut notices);
        }
        notices.deliver();
    }

    /// Feed a transport event into the state machine.
    pub fn handle_event(&self, event: TransportEvent) {
        self.inner.handle_event(event);
    }

    /// Pump transport events until the channel closes or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<TransportEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Subscription manager event loop cancelled");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("Transport event channel closed");
                        break;
                    };
                    self.handle_event(event);
                }
            }
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// Check if the connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Register a listener for connection state transitions.
    pub fn on_connection_state_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        state.next_listener_id += 1;
        let id = state.next_listener_id;
        state.listeners.push((id, Arc::new(listener)));

        ListenerHandle {
            manager: Arc::downgrade(&self.inner),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Current subscription statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.inner.state.lock().book.stats()
    }
}

impl Inner {
    fn subscribe(&self, topic: &str, callback: PriceCallback) -> SubscriberId {
        let mut notices = Notices::default();
        let subscriber_id = {
            let mut state = self.state.lock();

            if state.connection == ConnectionState::Disconnected {
                self.connect_locked(&mut state, &mut notices);
            }

            let connected = state.connection.is_connected();
            let ManagerState {
                book,
                subscription_ids,
                ..
            } = &mut *state;

            let subscriber_id = book.allocate_subscriber_id();
            let record = SubscriberRecord::new(subscriber_id, callback);
            let change =
                book.add_subscriber(topic, record, connected, &mut || subscription_ids.next_id());

            if let Some(change) = change {
                self.apply_change(&change);
            }

            if !connected {
                tracing::debug!(topic, subscriber_id, state = %state.connection, "Subscription queued until connected");
            }
            metrics::set_active_topics(state.book.stats().topic_count);
            subscriber_id
        };

        notices.deliver();
        subscriber_id
    }

    fn unsubscribe(&self, topic: &str, subscriber_id: SubscriberId) {
        let mut notices = Notices::default();
        {
            let mut state = self.state.lock();
            let removal = state.book.remove_subscriber(topic, subscriber_id);

            if let Some(change) = &removal.change {
                self.apply_change(change);
            }
            tracing::debug!(
                topic,
                subscriber_id,
                removed = removal.removed,
                "Subscriber removed"
            );
            metrics::set_active_topics(state.book.stats().topic_count);

            // Nobody is listening any more - drop the idle connection
            if state.book.is_idle() && state.transport_active {
                tracing::info!("No subscriptions left, closing idle connection");
                self.disconnect_locked(&mut state, &mut notices);
            }
        }
        notices.deliver();
    }

    fn connect_locked(&self, state: &mut ManagerState, notices: &mut Notices) {
        if state.connection != ConnectionState::Disconnected {
            tracing::debug!(state = %state.connection, "Connect ignored, connection already in progress");
            return;
        }

        state.transition(ConnectionState::Connecting, notices);
        state.transport_active = true;
        self.transport.open();
    }

    fn disconnect_locked(&self, state: &mut ManagerState, notices: &mut Notices) {
        if !state.transport_active {
            return;
        }

        if state.connection.is_connected() {
            self.transport.send(encode_disconnect());
        }
        self.transport.close();
        state.transport_active = false;
        state.book.clear();
        metrics::set_active_topics(0);
        state.transition(ConnectionState::Disconnected, notices);
    }

    fn apply_change(&self, change: &WireChange) {
        match change {
            WireChange::Subscribe {
                topic,
                destination,
                subscription_id,
            } => {
                tracing::debug!(topic = %topic, subscription_id = %subscription_id, "Sending SUBSCRIBE");
                self.transport
                    .send(encode_subscribe(destination, subscription_id));
            }
            WireChange::Unsubscribe {
                topic,
                subscription_id,
            } => {
                tracing::debug!(topic = %topic, subscription_id = %subscription_id, "Sending UNSUBSCRIBE");
                self.transport.send(encode_unsubscribe(subscription_id));
            }
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        let mut notices = Notices::default();

        match event {
            TransportEvent::Message(raw) => {
                // One socket message may carry several NUL-terminated frames
                for chunk in raw.split_terminator('\0') {
                    self.handle_frame_text(chunk);
                }
                return;
            }
            TransportEvent::Opened => {
                let mut state = self.state.lock();
                if !state.transport_active {
                    tracing::debug!("Ignoring open event for a closed session");
                    return;
                }

                // Every open is a fresh STOMP session; wire ids from an
                // earlier session mean nothing to the server
                let requeued = state.book.requeue_wired();
                if requeued > 0 {
                    tracing::info!(topics = requeued, "Socket reopened, re-queueing wired topics");
                    metrics::set_active_topics(0);
                }

                tracing::debug!("Socket open, sending CONNECT");
                state.transition(ConnectionState::Connecting, &mut notices);
                self.transport.send(encode_connect(
                    &self.settings.accept_version,
                    &self.settings.heartbeat,
                ));
            }
            TransportEvent::Closed => {
                let mut state = self.state.lock();
                if !state.transport_active {
                    return;
                }

                let stats = state.book.stats();
                tracing::info!(
                    topics = stats.topic_count,
                    pending = stats.pending_topic_count,
                    "Socket closed, dropping subscriptions"
                );
                state.book.clear();
                metrics::set_active_topics(0);
                state.transition(ConnectionState::Disconnected, &mut notices);
            }
            TransportEvent::Error(message) => {
                let mut state = self.state.lock();
                if !state.transport_active {
                    return;
                }

                tracing::warn!(error = %message, "Transport error");
                metrics::record_transport_error();
                state.transition(ConnectionState::Error, &mut notices);
            }
        }

        notices.deliver();
    }

    fn handle_frame_text(&self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::trace!("Heart-beat received");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                metrics::record_decode_error();
                return;
            }
        };

        metrics::record_frame_received(&frame.command);

        match frame.command {
            StompCommand::Connected => self.on_connected(&frame),
            StompCommand::Message => self.on_message(&frame),
            StompCommand::Error => self.on_error(&frame),
            ref other => {
                tracing::debug!(command = %other, "Ignoring frame");
            }
        }
    }

    fn on_connected(&self, frame: &StompFrame) {
        let mut notices = Notices::default();
        {
            let mut state = self.state.lock();
            if !state.transport_active {
                return;
            }

            tracing::info!(
                version = frame.header("version").unwrap_or("unknown"),
                "STOMP session established"
            );
            state.transition(ConnectionState::Connected, &mut notices);

            let ManagerState {
                book,
                subscription_ids,
                ..
            } = &mut *state;
            let changes = book.promote_pending(&mut || subscription_ids.next_id());
            for change in &changes {
                self.apply_change(change);
            }

            if !changes.is_empty() {
                tracing::info!(topics = changes.len(), "Pending subscriptions promoted");
            }
            metrics::set_active_topics(state.book.stats().topic_count);
        }
        notices.deliver();
    }

    fn on_error(&self, frame: &StompFrame) {
        let mut notices = Notices::default();
        {
            let mut state = self.state.lock();
            if !state.transport_active {
                tracing::debug!("Ignoring ERROR frame for a closed session");
                return;
            }

            tracing::error!(
                message = frame.header("message").unwrap_or_default(),
                body = %frame.body,
                "STOMP error frame"
            );
            state.transition(ConnectionState::Error, &mut notices);
        }
        notices.deliver();
    }

    fn on_message(&self, frame: &StompFrame) {
        let target = {
            let state = self.state.lock();
            frame
                .header("subscription")
                .and_then(|id| state.book.callbacks_for_subscription(id))
                .or_else(|| {
                    let code = frame
                        .header("destination")
                        .and_then(stock_code_from_destination)?;
                    state
                        .book
                        .callbacks_for_topic(code)
                        .map(|callbacks| (code.to_string(), callbacks))
                })
        };

        let Some((topic, callbacks)) = target else {
            tracing::debug!(
                subscription = frame.header("subscription").unwrap_or_default(),
                destination = frame.header("destination").unwrap_or_default(),
                "MESSAGE for unknown subscription"
            );
            return;
        };

        let update: StockPriceUpdate = match frame.json_body() {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Dropping malformed price update");
                metrics::record_decode_error();
                return;
            }
        };

        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&update))).is_err() {
                tracing::error!(topic = %topic, "Price update callback panicked");
                metrics::record_callback_panic();
            }
        }
        metrics::record_updates_delivered(callbacks.len());
    }

    fn remove_listener(&self, id: u64) {
        self.state.lock().listeners.retain(|(l, _)| *l != id);
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Handle to one subscriber record.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "the subscription stays registered until `unsubscribe` is called"]
#[derive(Debug)]
pub struct Subscription {
    manager: Weak<Inner>,
    topic: StockCode,
    subscriber_id: SubscriberId,
    active: AtomicBool,
}

impl Subscription {
    /// Remove this subscriber. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(&self.topic, self.subscriber_id);
        }
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Subscriber id.
    #[must_use]
    pub const fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    /// Check if `unsubscribe` has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Handle to a connection-state listener.
#[must_use = "the listener stays registered until `remove` is called"]
#[derive(Debug)]
pub struct ListenerHandle {
    manager: Weak<Inner>,
    id: u64,
    active: AtomicBool,
}

impl ListenerHandle {
    /// Deregister the listener. Safe to call more than once.
    pub fn remove(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.remove_listener(self.id);
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
