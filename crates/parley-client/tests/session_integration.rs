//! Integration Tests for the Session/Transport layer
//!
//! Every test runs a real loopback TCP connection against the harness mock
//! server, so correlation, push delivery and teardown are exercised through
//! the wire codec exactly as in production.

use std::sync::Arc;
use std::time::Duration;

use parley_client::{Session, SessionState};
use parley_core::{
    ChannelSubscriber, Event, EventBus, EventKind, OperationKind, Payload, Request,
    RequestFactory, ResponseReader, SessionConfig, StatusCode, Subscriber, TransportError,
};
use parley_core::ParleyError;
use parley_harness::{MockServer, DELAY_MS_KEY};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

async fn start_server() -> MockServer {
    let server = MockServer::start().await.expect("mock server should bind");
    server.add_user("alice", "secret");
    server.add_user("bob", "hunter2");
    server
}

async fn connect(server: &MockServer, config: SessionConfig) -> (Arc<Session>, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let session = Arc::new(Session::new(config, Arc::clone(&bus)));
    session
        .connect(&server.host(), server.port())
        .await
        .expect("session should connect");
    (session, bus)
}

fn delayed_ping(echo: &str, delay_ms: u64) -> Request {
    Request::new(
        OperationKind::Ping,
        Payload::new().with("echo", echo).with(DELAY_MS_KEY, delay_ms),
    )
}

/// Accept one connection and never read from it
async fn connect_to_silent_peer(config: SessionConfig) -> (Arc<Session>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move { listener.accept().await.map(|(stream, _)| stream) });

    let session = Arc::new(Session::new(config, Arc::new(EventBus::new())));
    session.connect("127.0.0.1", port).await.unwrap();
    let peer = accept.await.unwrap().unwrap();
    (session, peer)
}

/// A ping large enough to fill the socket buffers of a peer that never reads
fn oversized_ping() -> Request {
    let filler = "x".repeat(15 * 1024 * 1024);
    RequestFactory::ping(Some(filler.as_str()))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async move {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold within two seconds");
}

// ----------------------------------------------------------------------------
// Correlation Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_calls_receive_their_own_responses() {
    let server = start_server().await;
    let (session, _bus) = connect(&server, SessionConfig::testing()).await;

    // Later requests are answered first
    let mut calls = Vec::new();
    for (index, delay) in [250u64, 200, 150, 100, 50].into_iter().enumerate() {
        let session = Arc::clone(&session);
        let echo = format!("call-{}", index);
        calls.push(tokio::spawn(async move {
            let response = session.send_request(delayed_ping(&echo, delay)).await;
            (echo, response)
        }));
    }

    for call in calls {
        let (echo, response) = call.await.unwrap();
        let response = response.expect("call should succeed");
        assert!(response.success);
        assert_eq!(response.payload.get_str("echo"), Some(echo.as_str()));
    }
    assert_eq!(session.stats().responses_matched, 5);
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn test_event_during_pending_call_is_published_once() {
    let server = start_server().await;
    let (session, bus) = connect(&server, SessionConfig::testing()).await;
    let (subscriber, mut events) = ChannelSubscriber::new("test");
    bus.subscribe(Arc::new(subscriber));

    let caller = Arc::clone(&session);
    let call = tokio::spawn(async move { caller.send_request(delayed_ping("slow", 300)).await });
    wait_until(|| session.pending_calls() == 1).await;

    server.push_event(Event::new(EventKind::Broadcast, json!({ "content": "hello all" })));
    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event should arrive")
        .expect("channel should stay open");
    assert_eq!(event.kind, EventKind::Broadcast);
    assert_eq!(event.payload["content"], "hello all");

    // The push did not complete the pending call
    assert_eq!(session.pending_calls(), 1);
    assert_eq!(session.stats().responses_matched, 0);

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.payload.get_str("echo"), Some("slow"));
    assert!(events.try_recv().is_err());
    assert_eq!(session.stats().events_published, 1);
}

#[tokio::test]
async fn test_late_response_after_timeout_is_dropped() {
    let server = start_server().await;
    let (session, _bus) = connect(&server, SessionConfig::testing()).await;

    let err = session
        .send_request_within(delayed_ping("late", 200), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    wait_until(|| session.stats().stale_responses == 1).await;
    let response = session.send_request(RequestFactory::ping(Some("fresh"))).await.unwrap();
    assert_eq!(response.payload.get_str("echo"), Some("fresh"));
}

// ----------------------------------------------------------------------------
// Failure Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_request_times_out_when_server_is_silent() {
    let server = start_server().await;
    server.swallow(OperationKind::Ping);
    let config = SessionConfig {
        request_timeout_ms: 150,
        ..SessionConfig::testing()
    };
    let (session, _bus) = connect(&server, config).await;

    let err = session.send_request(RequestFactory::ping(None)).await.unwrap_err();
    assert!(matches!(
        err,
        ParleyError::Transport(TransportError::Timeout { duration_ms: 150 })
    ));
    assert_eq!(session.stats().timeouts, 1);
    assert_eq!(session.pending_calls(), 0);
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_disconnect_fails_pending_calls_promptly() {
    let server = start_server().await;
    server.swallow(OperationKind::Ping);
    let (session, _bus) = connect(&server, SessionConfig::patient()).await;

    let mut calls = Vec::new();
    for _ in 0..3 {
        let caller = Arc::clone(&session);
        calls.push(tokio::spawn(async move {
            caller.send_request(RequestFactory::ping(None)).await
        }));
    }
    wait_until(|| session.pending_calls() == 3).await;

    session.disconnect().await;
    for call in calls {
        let result = timeout(Duration::from_millis(500), call)
            .await
            .expect("pending call should fail without waiting for its timeout")
            .unwrap();
        assert!(result.unwrap_err().is_connection_lost());
    }
    assert_eq!(session.state(), SessionState::Disconnected);

    // Disconnecting again is a no-op
    session.disconnect().await;
}

#[tokio::test]
async fn test_server_close_fails_pending_calls() {
    let server = start_server().await;
    server.swallow(OperationKind::Ping);
    let (session, _bus) = connect(&server, SessionConfig::patient()).await;

    let caller = Arc::clone(&session);
    let call = tokio::spawn(async move { caller.send_request(RequestFactory::ping(None)).await });
    wait_until(|| session.pending_calls() == 1).await;

    server.close_connections();
    let result = timeout(Duration::from_secs(1), call).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_connection_lost());
    wait_until(|| !session.is_connected()).await;
}

#[tokio::test]
async fn test_disconnect_releases_caller_blocked_in_write() {
    let (session, _peer) = connect_to_silent_peer(SessionConfig::patient()).await;

    let caller = Arc::clone(&session);
    let call = tokio::spawn(async move { caller.send_request(oversized_ping()).await });
    wait_until(|| session.pending_calls() == 1).await;
    sleep(Duration::from_millis(100)).await;
    assert!(!call.is_finished());

    timeout(Duration::from_secs(3), session.disconnect())
        .await
        .expect("disconnect should not wait for the blocked write");
    let result = timeout(Duration::from_secs(3), call)
        .await
        .expect("blocked caller should be released by disconnect")
        .unwrap();
    assert!(result.unwrap_err().is_connection_lost());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_blocked_write_times_out_and_drops_connection() {
    let (session, _peer) = connect_to_silent_peer(SessionConfig::patient()).await;
    let mut closures = session.watch_closures();

    let err = timeout(
        Duration::from_secs(3),
        session.send_request_within(oversized_ping(), Duration::from_millis(200)),
    )
    .await
    .expect("deadline should cover the write")
    .unwrap_err();
    assert!(err.is_timeout());

    // A partial frame is on the wire, so the connection is gone
    assert!(!session.is_connected());
    assert_eq!(session.pending_calls(), 0);
    assert_eq!(session.stats().timeouts, 1);
    timeout(Duration::from_secs(1), closures.changed())
        .await
        .expect("closure should be announced")
        .unwrap();
}

#[tokio::test]
async fn test_connect_failure_and_misuse() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = Arc::new(Session::new(SessionConfig::testing(), Arc::new(EventBus::new())));
    let err = session.connect("127.0.0.1", port).await.unwrap_err();
    assert!(matches!(
        err,
        ParleyError::Transport(TransportError::ConnectionFailed { .. })
    ));

    let err = session.send_request(RequestFactory::ping(None)).await.unwrap_err();
    assert!(matches!(err, ParleyError::Transport(TransportError::NotConnected)));

    let server = start_server().await;
    session.connect(&server.host(), server.port()).await.unwrap();
    let err = session.connect(&server.host(), server.port()).await.unwrap_err();
    assert!(matches!(
        err,
        ParleyError::Transport(TransportError::AlreadyConnected { .. })
    ));
}

// ----------------------------------------------------------------------------
// Authentication Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_login_list_logout_then_unauthorized() {
    let server = start_server().await;
    let (session, _bus) = connect(&server, SessionConfig::testing()).await;

    let rejected = session.login("alice", "wrong").await.unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.status_code, StatusCode::Unauthorized);
    assert_eq!(session.state(), SessionState::Connected);

    let accepted = session.login("alice", "secret").await.unwrap();
    assert!(accepted.success);
    assert_eq!(session.state(), SessionState::Authenticated);
    assert!(server.is_online("alice"));

    let online = session.send_request(RequestFactory::list_online_users()).await.unwrap();
    let users = ResponseReader::users(&online).unwrap();
    assert!(users.iter().any(|u| u.username == "alice" && u.online));

    let bye = session.logout().await.unwrap();
    assert!(bye.success);
    assert!(session.auth().is_none());
    assert!(!server.is_online("alice"));

    let after = session.send_request(RequestFactory::list_online_users()).await.unwrap();
    assert!(!after.success);
    assert_eq!(after.status_code, StatusCode::Unauthorized);
}

#[tokio::test]
async fn test_forced_disconnect_is_published_then_tears_down() {
    let server = start_server().await;
    let (session, bus) = connect(&server, SessionConfig::patient()).await;
    let (subscriber, mut events) = ChannelSubscriber::new("watcher");
    let subscriber: Arc<dyn Subscriber> = Arc::new(subscriber);
    bus.subscribe(Arc::clone(&subscriber));

    session.login("bob", "hunter2").await.unwrap();
    server.swallow(OperationKind::Ping);
    let caller = Arc::clone(&session);
    let call = tokio::spawn(async move { caller.send_request(RequestFactory::ping(None)).await });
    wait_until(|| session.pending_calls() == 1).await;

    server.push_event_to(
        "bob",
        Event::new(EventKind::ForcedDisconnect, json!({ "reason": "logged in elsewhere" })),
    );

    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert_eq!(event.kind, EventKind::ForcedDisconnect);

    let result = timeout(Duration::from_secs(1), call).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_connection_lost());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.auth().is_none());

    // Reconnection is manual and starts unauthenticated
    session.connect(&server.host(), server.port()).await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert!(bus.unsubscribe(&subscriber));
}
