// tests/stream_connection_test.rs
//! Connection lifecycle tests against an in-memory transport.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

use common::{metrics_frame, tip_frame, MockConnector};
use trainwatch_lib::bus::EventBus;
use trainwatch_lib::settings::Settings;
use trainwatch_lib::stream::{
    Channel, Connection, ConnectionState, StreamClient, StreamError, StreamMode,
    MAX_RECONNECT_ATTEMPTS,
};
use trainwatch_lib::types::{ChatMessage, Sender};

fn training(connector: &Arc<MockConnector>, bus: &Arc<EventBus>) -> Connection {
    Connection::new(
        Channel::Training,
        "ws://mock/ws/train",
        connector.clone(),
        bus.clone(),
    )
}

fn agent(connector: &Arc<MockConnector>, bus: &Arc<EventBus>) -> Connection {
    Connection::new(
        Channel::Agent,
        "ws://mock/ws/agent",
        connector.clone(),
        bus.clone(),
    )
}

fn live_settings() -> Settings {
    Settings {
        greeting: false,
        ..Settings::default()
    }
}

fn chat_log(bus: &EventBus) -> (Arc<Mutex<Vec<ChatMessage>>>, trainwatch_lib::Subscription) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let sub = bus.on_chat(move |m| sink.lock().unwrap().push(m.clone()));
    (log, sub)
}

// ============================================================================
// Reconnect backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn refused_connection_backs_off_then_gives_up() {
    let connector = Arc::new(MockConnector::refusing());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    let start = Instant::now();
    conn.connect();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempt_offsets(start), vec![0, 2, 6, 14, 30, 60]);
    assert_eq!(connector.attempt_count(), 1 + MAX_RECONNECT_ATTEMPTS as usize);
    assert!(conn.is_exhausted());
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.attempt_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_after_giving_up_starts_a_fresh_budget() {
    let connector = Arc::new(MockConnector::refusing());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    conn.connect();
    sleep(Duration::from_secs(120)).await;
    assert!(conn.is_exhausted());

    conn.connect();
    assert!(!conn.is_exhausted());
    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 12);
    assert!(conn.is_exhausted());
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_replaces_pending_retry() {
    let connector = Arc::new(MockConnector::refusing());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    let start = Instant::now();
    conn.connect();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(conn.attempt(), 1);

    conn.connect();
    sleep(Duration::from_millis(2500)).await;

    // The retry scheduled for t=2 was cancelled; the new attempt at t=1
    // failed and retried after the first-step delay.
    assert_eq!(connector.attempt_offsets(start), vec![0, 1, 3]);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_the_backoff() {
    let connector = Arc::new(MockConnector::refusing());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    let start = Instant::now();
    conn.connect();
    sleep(Duration::from_secs(3)).await;
    connector.set_refuse(false);

    let mut peer = connector.next_peer().await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(conn.attempt(), 0);

    peer.hang_up();
    let _again = connector.next_peer().await;
    assert_eq!(connector.attempt_offsets(start), vec![0, 2, 6, 8]);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_pending_retry() {
    let connector = Arc::new(MockConnector::refusing());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    conn.connect();
    sleep(Duration::from_secs(1)).await;
    conn.close();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(!conn.is_exhausted());
}

#[tokio::test(start_paused = true)]
async fn close_while_open_does_not_reconnect() {
    let connector = Arc::new(MockConnector::accepting());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    conn.connect();
    let _peer = connector.next_peer().await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(conn.state(), ConnectionState::Open);

    conn.close();
    conn.close();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_is_a_no_op_while_connecting_or_open() {
    let connector = Arc::new(MockConnector::accepting());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    conn.connect();
    conn.connect();
    assert_eq!(conn.state(), ConnectionState::Connecting);
    let _peer = connector.next_peer().await;
    sleep(Duration::from_millis(10)).await;
    conn.connect();

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(conn.state(), ConnectionState::Open);
}

// ============================================================================
// Inbound frames
// ============================================================================

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_without_closing() {
    let connector = Arc::new(MockConnector::accepting());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    let epochs = Arc::new(Mutex::new(Vec::new()));
    let tips = Arc::new(Mutex::new(Vec::new()));
    let e = epochs.clone();
    let t = tips.clone();
    let _m = bus.on_metrics(move |m| e.lock().unwrap().push(m.epoch));
    let _t = bus.on_tip(move |tip| t.lock().unwrap().push(tip.id.clone()));

    conn.connect();
    let peer = connector.next_peer().await;
    peer.push("this is not json");
    peer.push(r#"{"type":"metrics","payload":{"epoch":"three"}}"#);
    peer.push(r#"{"type":"progress","payload":{}}"#);
    peer.push(metrics_frame(3, 0.8, 0.2));
    peer.push(tip_frame("tip-1", "loss is flat"));
    sleep(Duration::from_millis(10)).await;

    assert_eq!(*epochs.lock().unwrap(), vec![3]);
    assert_eq!(*tips.lock().unwrap(), vec!["tip-1".to_string()]);
    assert_eq!(conn.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn unreadable_frame_is_skipped_and_connection_stays_open() {
    let connector = Arc::new(MockConnector::accepting());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    let epochs = Arc::new(Mutex::new(Vec::new()));
    let e = epochs.clone();
    let _m = bus.on_metrics(move |m| e.lock().unwrap().push(m.epoch));

    conn.connect();
    let peer = connector.next_peer().await;
    peer.push_unreadable("binary frame is not UTF-8");
    peer.push(metrics_frame(4, 0.9, 0.1));
    sleep(Duration::from_millis(10)).await;

    assert_eq!(*epochs.lock().unwrap(), vec![4]);
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn agent_frames_are_normalized() {
    let connector = Arc::new(MockConnector::accepting());
    let bus = Arc::new(EventBus::new());
    let conn = agent(&connector, &bus);
    let (log, _sub) = chat_log(&bus);

    conn.connect();
    let peer = connector.next_peer().await;
    peer.push(r#"{"content":"try a smaller batch","sender":"assistant"}"#);
    peer.push(r#"{"id":7,"content":"echo","sender":"user","timestamp":"2024-01-01T00:00:00Z"}"#);
    peer.push(r#"{"sender":"agent"}"#);
    peer.push(r#"["not","an","object"]"#);
    sleep(Duration::from_millis(10)).await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].sender, Sender::Agent);
    assert!(!log[0].id.is_empty());
    assert!(!log[0].timestamp.is_empty());
    assert_eq!(log[1].id, "7");
    assert_eq!(log[1].sender, Sender::User);
    assert_eq!(log[1].timestamp, "2024-01-01T00:00:00Z");
    assert_eq!(conn.state(), ConnectionState::Open);
}

// ============================================================================
// Outbound chat
// ============================================================================

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_drops_and_connects() {
    let connector = Arc::new(MockConnector::accepting());
    let bus = Arc::new(EventBus::new());
    let conn = agent(&connector, &bus);

    let err = assert_err!(conn.send("lost"));
    assert!(matches!(err, StreamError::NotConnected { channel: Channel::Agent }));

    let mut peer = connector.next_peer().await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(peer.received().await, None);

    assert_ok!(conn.send("hello"));
    assert_eq!(peer.received().await.as_deref(), Some(r#"{"content":"hello"}"#));
}

#[tokio::test(start_paused = true)]
async fn training_channel_refuses_outbound_messages() {
    let connector = Arc::new(MockConnector::accepting());
    let bus = Arc::new(EventBus::new());
    let conn = training(&connector, &bus);

    let err = assert_err!(conn.send("hi"));
    assert!(matches!(err, StreamError::SendUnsupported { .. }));
    assert_eq!(connector.attempt_count(), 0);
}

// ============================================================================
// StreamClient over the mock transport
// ============================================================================

#[tokio::test(start_paused = true)]
async fn channels_reconnect_independently() {
    let connector = Arc::new(MockConnector::accepting());
    let client = StreamClient::with_connector(live_settings(), connector.clone()).unwrap();

    client.connect_training();
    client.connect_agent();
    let mut first = connector.next_peer().await;
    let second = connector.next_peer().await;
    sleep(Duration::from_millis(10)).await;

    let mut urls = vec![first.url.clone(), second.url.clone()];
    urls.sort();
    assert_eq!(
        urls,
        vec![
            "ws://localhost:8000/ws/agent".to_string(),
            "ws://localhost:8000/ws/train".to_string(),
        ]
    );

    connector.set_refuse(true);
    first.hang_up();
    sleep(Duration::from_millis(10)).await;

    let states = [
        client.connection_state(Channel::Training),
        client.connection_state(Channel::Agent),
    ];
    assert_eq!(
        states
            .iter()
            .filter(|s| **s == Some(ConnectionState::Open))
            .count(),
        1
    );
    assert_eq!(
        states
            .iter()
            .filter(|s| **s == Some(ConnectionState::Disconnected))
            .count(),
        1
    );
    client.disconnect();
}

#[tokio::test(start_paused = true)]
async fn live_chat_goes_out_as_content_frame() {
    let connector = Arc::new(MockConnector::accepting());
    let client = StreamClient::with_connector(live_settings(), connector.clone()).unwrap();

    client.connect_agent();
    let mut peer = connector.next_peer().await;
    sleep(Duration::from_millis(10)).await;

    assert_ok!(client.send_chat_message("how is it going?"));
    assert_eq!(
        peer.received().await.as_deref(),
        Some(r#"{"content":"how is it going?"}"#)
    );
}

#[tokio::test(start_paused = true)]
async fn reconfigure_keeps_subscriptions_and_reconnects() {
    let connector = Arc::new(MockConnector::accepting());
    let client = StreamClient::with_connector(live_settings(), connector.clone()).unwrap();

    let epochs = Arc::new(Mutex::new(Vec::new()));
    let e = epochs.clone();
    let _sub = client.on_training_metrics(move |m| e.lock().unwrap().push(m.epoch));

    client.connect_training();
    let peer = connector.next_peer().await;
    peer.push(metrics_frame(1, 0.5, 0.5));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(*epochs.lock().unwrap(), vec![1]);

    client
        .reconfigure(Settings {
            demo_mode: true,
            ..live_settings()
        })
        .unwrap();
    assert_eq!(client.mode(), StreamMode::Demo);
    assert_eq!(client.connection_state(Channel::Training), None);

    // Demo metrics start after two seconds and flow to the same handler.
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(*epochs.lock().unwrap(), vec![1, 1]);

    client.reconfigure(live_settings()).unwrap();
    assert_eq!(client.mode(), StreamMode::Live);
    let again = connector.next_peer().await;
    assert_eq!(again.url, "ws://localhost:8000/ws/train");
    assert_eq!(connector.attempt_count(), 2);
    client.disconnect();
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_a_pending_reconnect() {
    let connector = Arc::new(MockConnector::refusing());
    let client = StreamClient::with_connector(live_settings(), connector.clone()).unwrap();

    client.connect_training();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.attempt_count(), 1);

    client.disconnect();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(
        client.connection_state(Channel::Training),
        Some(ConnectionState::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_before_the_greeting_suppresses_it() {
    let connector = Arc::new(MockConnector::accepting());
    let settings = Settings {
        greeting: true,
        ..live_settings()
    };
    let client = StreamClient::with_connector(settings, connector).unwrap();
    let (log, _sub) = chat_log(&client.bus());

    client.disconnect();
    sleep(Duration::from_secs(2)).await;
    assert!(log.lock().unwrap().is_empty());
}
