//! Subscription Lifecycle Integration Tests
//!
//! Drives the subscription manager through its public API with a recording
//! transport standing in for the socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use price_stream::{
    ConnectionState, StockPriceUpdate, StompSessionSettings, SubscriptionManager, TransportEvent,
};
use rust_decimal::Decimal;

use common::{RecordingTransport, SAMSUNG_JSON, price_message};

fn setup() -> (SubscriptionManager, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let manager = SubscriptionManager::create(transport.clone(), StompSessionSettings::default());
    (manager, transport)
}

fn establish(manager: &SubscriptionManager) {
    manager.handle_event(TransportEvent::Opened);
    manager.handle_event(TransportEvent::Message(
        "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0".to_string(),
    ));
}

#[test]
fn samsung_update_delivered_once_with_exact_fields() {
    let (manager, transport) = setup();
    let received: Arc<Mutex<Vec<StockPriceUpdate>>> = Arc::default();

    let sink = Arc::clone(&received);
    let _subscription = manager.subscribe("005930", move |update| sink.lock().push(update.clone()));

    assert_eq!(transport.opens(), 1);
    establish(&manager);
    assert_eq!(transport.sent("SUBSCRIBE").len(), 1);

    manager.handle_event(TransportEvent::Message(price_message(
        "sub-1",
        "005930",
        SAMSUNG_JSON,
    )));

    let expected = StockPriceUpdate {
        stock_code: "005930".to_string(),
        stock_name: "삼성전자".to_string(),
        current_price: Decimal::from(75_000),
        change_price: Decimal::from(1_500),
        change_rate: Decimal::new(204, 2),
        volume: 25_678_432,
        timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
    };
    assert_eq!(*received.lock(), vec![expected]);
}

#[test]
fn dedup_across_three_subscribers() {
    let (manager, transport) = setup();
    manager.connect();
    establish(&manager);

    let handles: Vec<_> = (0..3).map(|_| manager.subscribe("005930", |_| {})).collect();
    assert_eq!(transport.sent("SUBSCRIBE").len(), 1);

    handles[0].unsubscribe();
    handles[1].unsubscribe();
    assert!(transport.sent("UNSUBSCRIBE").is_empty());
    assert_eq!(manager.stats().subscriber_count, 1);

    handles[2].unsubscribe();
    assert_eq!(transport.sent("UNSUBSCRIBE").len(), 1);
}

#[test]
fn idle_teardown_after_last_topic() {
    let (manager, transport) = setup();
    let log: Arc<Mutex<Vec<ConnectionState>>> = Arc::default();
    let sink = Arc::clone(&log);
    let _listener = manager.on_connection_state_change(move |s| sink.lock().push(s));

    let a = manager.subscribe("005930", |_| {});
    let b = manager.subscribe("000660", |_| {});
    establish(&manager);
    assert_eq!(transport.sent("SUBSCRIBE").len(), 2);

    a.unsubscribe();
    assert!(manager.is_connected());

    b.unsubscribe();
    assert_eq!(transport.closes(), 1);
    assert_eq!(transport.sent("DISCONNECT").len(), 1);
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);

    assert_eq!(
        *log.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[test]
fn pending_queue_survives_until_connected() {
    let (manager, transport) = setup();

    let first = manager.subscribe("005930", |_| {});
    let _second = manager.subscribe("005930", |_| {});
    let _third = manager.subscribe("035720", |_| {});
    first.unsubscribe();

    let stats = manager.stats();
    assert_eq!(stats.pending_topic_count, 2);
    assert_eq!(stats.pending_subscriber_count, 2);
    assert!(transport.sent("SUBSCRIBE").is_empty());

    establish(&manager);

    let subscribes = transport.sent("SUBSCRIBE");
    assert_eq!(subscribes.len(), 2);
    assert!(subscribes[0].contains("destination:/topic/price/005930\n"));
    assert!(subscribes[1].contains("destination:/topic/price/035720\n"));
    assert_eq!(manager.stats().subscriber_count, 2);
}

#[test]
fn batched_frames_in_one_message_are_all_handled() {
    let (manager, _transport) = setup();
    let count = Arc::new(Mutex::new(0_u32));

    let counter = Arc::clone(&count);
    let _s = manager.subscribe("005930", move |_| *counter.lock() += 1);
    manager.handle_event(TransportEvent::Opened);

    let batch = format!(
        "CONNECTED\nversion:1.2\n\n\0{}\n{}",
        price_message("sub-1", "005930", SAMSUNG_JSON),
        price_message("sub-1", "005930", SAMSUNG_JSON),
    );
    manager.handle_event(TransportEvent::Message(batch));

    assert!(manager.is_connected());
    assert_eq!(*count.lock(), 2);
}

#[test]
fn handle_outliving_manager_is_harmless() {
    let (manager, _transport) = setup();
    let subscription = manager.subscribe("005930", |_| {});
    drop(manager);

    subscription.unsubscribe();
    assert!(!subscription.is_active());
}

#[test]
fn dispose_closes_session() {
    let (manager, transport) = setup();
    let _s = manager.subscribe("005930", |_| {});
    establish(&manager);

    manager.dispose();

    assert_eq!(transport.sent("DISCONNECT").len(), 1);
    assert_eq!(transport.closes(), 1);
    assert_eq!(manager.stats().topic_count, 0);
}
