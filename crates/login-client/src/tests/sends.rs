//! Outbound sends and the set_name operation.

use reqwest::Method;
use serde_json::{json, Value};

use super::harness::{advance, settle, Reply, TestHarness};
use crate::client::queued_sends;
use crate::error::ClientError;
use crate::events::{Event, EventName};
use crate::http::Credentials;
use crate::messages::ClientMessage;

const USER_URI: &str = "https://login.example.com/users/42";

async fn logged_in_harness() -> TestHarness {
    let h = TestHarness::new();
    let connection = h.connect_and_authenticate().await;
    connection.deliver(json!({
        "type": "loggedIn",
        "data": { "user": { "uri": USER_URI, "name": "Ada" } }
    }));
    settle().await;
    h
}

// =============================================================================
// send()
// =============================================================================

/// An open socket transmits immediately and publishes the raw frame.
#[tokio::test(start_paused = true)]
async fn test_send_on_open_socket() {
    let h = TestHarness::new();
    let connection = h.connect_and_authenticate().await;
    h.clear_events();

    h.client
        .send(ClientMessage::new("subscribe").with_field("channel", "news"));

    assert_eq!(
        connection.sent().last().unwrap(),
        &json!({ "type": "subscribe", "channel": "news" })
    );
    let events = h.events();
    assert_eq!(events.len(), 1);
    let Event::MessageSent { message } = &events[0] else {
        panic!("expected messageSent, got {:?}", events[0]);
    };
    let sent: Value = serde_json::from_str(message).unwrap();
    assert_eq!(sent["type"], "subscribe");
}

/// A write that fails on an open socket is logged only: no event, no retry.
#[tokio::test(start_paused = true)]
async fn test_failed_write_publishes_nothing() {
    let h = TestHarness::new();
    let connection = h.connect_and_authenticate().await;
    h.clear_events();
    connection.reject_sends();

    h.client.send(ClientMessage::new("hello"));
    settle().await;

    assert_eq!(h.count(EventName::MessageSent), 0);
    assert!(h.errors().is_empty());
    assert_eq!(queued_sends(&h.client), 0);
    assert!(!connection.is_closed());
    assert!(h.client.connected());
    assert!(!connection.sent_types().contains(&"hello".to_string()));
}

/// A send before the socket opens waits for the retry delay.
#[tokio::test(start_paused = true)]
async fn test_send_before_open_is_retried() {
    let h = TestHarness::new();
    h.client.send(ClientMessage::new("hello"));
    assert_eq!(queued_sends(&h.client), 1);
    assert_eq!(h.count(EventName::MessageSent), 0);

    let connection = h.connect_and_open().await;
    assert_eq!(connection.sent_types(), vec!["authenticate"]);

    advance(1_000).await;
    assert_eq!(connection.sent_types(), vec!["authenticate", "hello"]);
    assert_eq!(queued_sends(&h.client), 0);
}

/// Queued sends keep backing off while the socket stays closed.
#[tokio::test(start_paused = true)]
async fn test_queued_send_backs_off() {
    let h = TestHarness::new();
    h.client.connect();
    h.client.send(ClientMessage::new("hello"));

    // First retry at 1000ms finds the socket still closed; the next waits 1200ms
    advance(1_100).await;
    let connection = h.transport.latest();
    connection.open();
    settle().await;
    assert_eq!(queued_sends(&h.client), 1);

    advance(1_000).await;
    assert_eq!(connection.sent_types(), vec!["authenticate"]);

    advance(200).await;
    assert_eq!(connection.sent_types(), vec!["authenticate", "hello"]);
}

/// Queued sends go out in the order they were made.
#[tokio::test(start_paused = true)]
async fn test_queued_sends_keep_order() {
    let h = TestHarness::new();
    h.client.send(ClientMessage::new("first"));
    h.client.send(ClientMessage::new("second"));
    h.client.send(ClientMessage::new("third"));
    assert_eq!(queued_sends(&h.client), 3);

    let connection = h.connect_and_open().await;
    advance(1_000).await;

    assert_eq!(
        connection.sent_types(),
        vec!["authenticate", "first", "second", "third"]
    );
}

// =============================================================================
// set_name()
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_set_name_requires_login() {
    let h = TestHarness::new();

    let err = h.client.set_name("Grace").await.unwrap_err();

    assert!(matches!(err, ClientError::NotLoggedIn));
    assert!(h.http.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_set_name_rejects_empty_name() {
    let h = logged_in_harness().await;
    let before = h.http.requests().len();

    let err = h.client.set_name("").await.unwrap_err();

    assert!(matches!(err, ClientError::InvalidName));
    assert_eq!(h.http.requests().len(), before);
}

/// A user record without a usable URI cannot be renamed.
#[tokio::test(start_paused = true)]
async fn test_set_name_rejects_user_without_uri() {
    let h = TestHarness::new();
    let connection = h.connect_and_authenticate().await;
    connection.deliver(json!({ "type": "loggedIn", "data": { "user": { "name": "Ada" } } }));
    settle().await;
    let before = h.http.requests().len();

    let err = h.client.set_name("Grace").await.unwrap_err();

    assert!(matches!(err, ClientError::InvalidUrl(_)));
    assert_eq!(h.http.requests().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_set_name_patches_user() {
    let h = logged_in_harness().await;
    h.http.reply(USER_URI, Reply::json(200, json!({ "name": "Grace" })));

    let response = h.client.set_name("Grace").await.unwrap();
    assert_eq!(response.status, 200);

    let request = h.http.requests().pop().unwrap();
    assert_eq!(request.method, Method::PATCH);
    assert_eq!(request.url, USER_URI);
    assert_eq!(request.credentials, Credentials::Include);
    assert_eq!(request.header("content-type"), Some("application/json"));
    let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({ "name": "Grace" }));
}

/// The rename does not touch local state; the server pushes `updated`.
#[tokio::test(start_paused = true)]
async fn test_set_name_leaves_user_untouched() {
    let h = logged_in_harness().await;
    h.http.reply(USER_URI, Reply::json(200, json!({})));

    h.client.set_name("Grace").await.unwrap();

    assert_eq!(h.client.user().unwrap().name(), Some("Ada"));
    assert_eq!(h.count(EventName::Update), 0);
}

#[tokio::test(start_paused = true)]
async fn test_set_name_surfaces_http_error() {
    let h = logged_in_harness().await;
    h.http.reply(USER_URI, Reply::Status(403, String::new()));

    let err = h.client.set_name("Grace").await.unwrap_err();

    assert_eq!(err.status(), Some(403));
}
