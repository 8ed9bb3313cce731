//! Heartbeat ping cadence and stale connection detection.
//!
//! Uses a 100ms ping interval, so a connection without pongs is stale once
//! 5 * 100 + 500 = 1000ms have passed since the socket opened.

use std::time::Duration;

use serde_json::json;

use super::harness::{advance, wait_until, TestHarness};
use crate::config::ClientOptions;
use crate::error::ErrorKind;
use crate::events::EventName;

fn fast_heartbeat() -> TestHarness {
    TestHarness::with_options(ClientOptions {
        ping_interval_ms: 100,
        ..ClientOptions::default()
    })
}

fn pings(sent: &[String]) -> usize {
    sent.iter().filter(|t| *t == "ping").count()
}

#[tokio::test(start_paused = true)]
async fn test_pings_every_interval() {
    let h = fast_heartbeat();
    let connection = h.connect_and_authenticate().await;
    assert_eq!(pings(&connection.sent_types()), 0);

    advance(350).await;
    assert_eq!(pings(&connection.sent_types()), 3);
    assert_eq!(connection.sent().last().unwrap(), &json!({ "type": "ping" }));
}

/// Pings are published as `messageSent` like any other outbound frame.
#[tokio::test(start_paused = true)]
async fn test_pings_are_published() {
    let h = fast_heartbeat();
    h.connect_and_authenticate().await;
    h.clear_events();

    advance(150).await;
    assert_eq!(h.event_names(), vec![EventName::MessageSent]);
}

/// Without pongs the socket is closed and reported as unreachable.
#[tokio::test(start_paused = true)]
async fn test_missing_pongs_close_socket() {
    let h = fast_heartbeat();
    let connection = h.connect_and_authenticate().await;

    advance(950).await;
    assert!(!connection.is_closed());

    advance(200).await;
    assert!(connection.is_closed());
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::ServerConnection);
    assert_eq!(h.count(EventName::Disconnect), 1);
    assert_eq!(
        h.state_event_names(),
        vec![EventName::Connect, EventName::Error, EventName::Disconnect]
    );
    assert!(!h.client.connected());
}

/// The stale error is published before the disconnect it causes, even when
/// the socket pump runs on another worker while error listeners are slow.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_error_precedes_disconnect_across_threads() {
    let h = fast_heartbeat();
    h.client.on(EventName::Error, |_| {
        std::thread::sleep(Duration::from_millis(50));
    });

    h.client.connect();
    let connection = h.transport.latest();
    connection.open();
    connection.deliver(json!({ "type": "authenticated" }));
    wait_until(|| h.client.connected()).await;

    wait_until(|| h.count(EventName::Disconnect) == 1).await;
    assert_eq!(
        h.state_event_names(),
        vec![EventName::Connect, EventName::Error, EventName::Disconnect]
    );
}

/// A stale socket is reconnected like any other closed socket.
#[tokio::test(start_paused = true)]
async fn test_stale_socket_reconnects() {
    let h = fast_heartbeat();
    h.connect_and_authenticate().await;

    advance(1_150).await;
    assert_eq!(h.transport.connection_count(), 1);

    advance(1_000).await;
    assert_eq!(h.transport.connection_count(), 2);
}

/// Regular pongs keep the socket alive indefinitely.
#[tokio::test(start_paused = true)]
async fn test_pongs_keep_socket_alive() {
    let h = fast_heartbeat();
    let connection = h.connect_and_authenticate().await;

    for _ in 0..20 {
        advance(200).await;
        connection.deliver(json!({ "type": "pong" }));
    }
    advance(50).await;

    assert!(!connection.is_closed());
    assert!(h.errors().is_empty());
    assert!(h.client.connected());
    assert!(pings(&connection.sent_types()) >= 40);
}

/// The heartbeat stops once the client disconnects.
#[tokio::test(start_paused = true)]
async fn test_no_pings_after_disconnect() {
    let h = fast_heartbeat();
    let connection = h.connect_and_authenticate().await;
    advance(250).await;
    let before = pings(&connection.sent_types());

    h.client.disconnect();
    advance(2_000).await;

    assert_eq!(pings(&connection.sent_types()), before);
    assert!(h.errors().is_empty());
}
