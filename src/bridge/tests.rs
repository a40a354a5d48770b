//! End-to-end bridge scenarios over the in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::{Instant, sleep};
use tracing_subscriber::EnvFilter;

use crate::error::{Error, ErrorKind};
use crate::protocol::{ControlKind, Frame, Source, decode};
use crate::transport::CLOSE_NORMAL;
use crate::transport::memory::{self, AcceptMode, MemoryBackend, MemoryPeer};

use super::ConnectionState::*;
use super::*;

// ============================================================================
// Helpers
// ============================================================================

/// Installs a test-writer subscriber once; `RUST_LOG` overrides the filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("connection_bridge=warn"));

    // Every test calls this; only the first install wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

fn builder(connector: memory::MemoryConnector) -> BridgeBuilder {
    init_logging();
    Bridge::builder().connector(connector).without_heartbeat()
}

struct Harness {
    bridge: Bridge,
    backend: MemoryBackend,
    peer: MemoryPeer,
    events: broadcast::Receiver<BridgeEvent>,
}

async fn open_with(configure: impl FnOnce(BridgeBuilder) -> BridgeBuilder) -> Harness {
    let (connector, mut backend) = memory::channel();
    let bridge = configure(builder(connector)).build().expect("build");
    let mut events = bridge.events();

    bridge.connect().expect("connect");
    let peer = backend.accept().await.expect("peer");
    next_matching(&mut events, |event| match event {
        BridgeEvent::Connected { .. } => Some(()),
        _ => None,
    })
    .await;
    assert_eq!(bridge.state(), Open);

    Harness {
        bridge,
        backend,
        peer,
        events,
    }
}

async fn open() -> Harness {
    open_with(|b| b).await
}

async fn next_state(events: &mut broadcast::Receiver<BridgeEvent>) -> StateChange {
    loop {
        if let BridgeEvent::StateChanged(change) = events.recv().await.expect("event") {
            return change;
        }
    }
}

async fn expect_transition(
    events: &mut broadcast::Receiver<BridgeEvent>,
    old: ConnectionState,
    new: ConnectionState,
) {
    let change = next_state(events).await;
    assert_eq!((change.old, change.new), (old, new), "reason: {}", change.reason);
}

async fn next_matching<T>(
    events: &mut broadcast::Receiver<BridgeEvent>,
    mut select: impl FnMut(BridgeEvent) -> Option<T>,
) -> T {
    loop {
        if let Some(found) = select(events.recv().await.expect("event")) {
            return found;
        }
    }
}

fn drain(events: &mut broadcast::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn spawn_call(
    bridge: &Bridge,
    name: &'static str,
    timeout: Duration,
) -> tokio::task::JoinHandle<crate::Result<Value>> {
    let bridge = bridge.clone();
    tokio::spawn(async move { bridge.call(name, json!({}), Some(timeout)).await })
}

// ============================================================================
// Calls
// ============================================================================

#[tokio::test]
async fn test_call_round_trip_updates_stats() {
    let mut h = open().await;

    let call = spawn_call(&h.bridge, "get_users", Duration::from_millis(5000));
    let request = h.peer.next_envelope().await.expect("request");
    assert_eq!(request.name, "get_users");
    assert_eq!(request.source, Source::Frontend);
    assert!(request.request_id().is_some());

    h.peer.reply(&request, json!({"success": true, "data": [{"id": 1}, {"id": 2}]}));

    let payload = call.await.expect("join").expect("resolved");
    assert_eq!(payload["data"][1]["id"], 2);

    let stats = h.bridge.stats();
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.messages_received, 1);
    assert!(stats.bytes_sent > 0);
    assert!(stats.last_message_at.is_some());
    assert_eq!(h.bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_call_default_uses_configured_timeout() {
    let mut h = open_with(|b| b.call_timeout(Duration::from_secs(7))).await;
    assert_eq!(h.bridge.config().call_timeout, Duration::from_secs(7));

    let bridge = h.bridge.clone();
    let call = tokio::spawn(async move { bridge.call_default("ping_backend", json!({})).await });
    let request = h.peer.next_envelope().await.expect("request");
    h.peer.reply(&request, json!({"ok": true}));

    assert_eq!(call.await.expect("join").expect("ok"), json!({"ok": true}));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out_and_is_removed() {
    let mut h = open().await;

    let started = Instant::now();
    let err = h
        .bridge
        .call("get_users", json!({}), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(h.bridge.pending_count(), 0);

    let (name, timeout) = next_matching(&mut h.events, |event| match event {
        BridgeEvent::CallTimeout { name, timeout, .. } => Some((name, timeout)),
        _ => None,
    })
    .await;
    assert_eq!(name, "get_users");
    assert_eq!(timeout, Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_late_response_settles_nothing() {
    let mut h = open().await;

    let late = spawn_call(&h.bridge, "slow", Duration::from_millis(100));
    let request = h.peer.next_envelope().await.expect("request");
    assert!(late.await.expect("join").unwrap_err().is_timeout());

    // Late answer, then a fresh round trip as an ordering barrier
    h.peer.reply(&request, json!({"success": true}));
    let fresh = spawn_call(&h.bridge, "fast", Duration::from_secs(5));
    let second = h.peer.next_envelope().await.expect("request");
    h.peer.reply(&second, json!({"n": 2}));
    assert_eq!(fresh.await.expect("join").expect("ok"), json!({"n": 2}));

    let events = drain(&mut h.events);
    assert!(!events.iter().any(|e| matches!(e, BridgeEvent::Message(_))));
    assert!(!events.iter().any(|e| matches!(e, BridgeEvent::Error(_))));
    assert_eq!(h.bridge.stats().errors_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_after_many_round_trips_is_not_dispatched() {
    let mut h = open().await;

    let dispatched = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&dispatched);
    h.bridge.on("slow", move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let late = spawn_call(&h.bridge, "slow", Duration::from_millis(100));
    let request = h.peer.next_envelope().await.expect("request");
    assert!(late.await.expect("join").unwrap_err().is_timeout());

    for n in 0..300 {
        let call = spawn_call(&h.bridge, "fast", Duration::from_secs(5));
        let next = h.peer.next_envelope().await.expect("request");
        h.peer.reply(&next, json!({ "n": n }));
        assert_eq!(call.await.expect("join").expect("ok"), json!({ "n": n }));
    }

    h.peer.reply(&request, json!({"success": true}));
    let barrier = spawn_call(&h.bridge, "fast", Duration::from_secs(5));
    let next = h.peer.next_envelope().await.expect("request");
    h.peer.reply(&next, json!({}));
    barrier.await.expect("join").expect("ok");

    assert_eq!(dispatched.load(Ordering::SeqCst), 0);
    let events = drain(&mut h.events);
    assert!(!events.iter().any(|e| matches!(e, BridgeEvent::Message(_))));
}

#[tokio::test]
async fn test_call_while_disconnected_fails_fast() {
    let (connector, backend) = memory::channel();
    let bridge = builder(connector).build().expect("build");

    let err = bridge.call("get_users", json!({}), None).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected { state: Uninstantiated }));
    assert_eq!(err.kind(), ErrorKind::TransportError);

    let err = bridge.notify("refresh", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportError);

    assert_eq!(bridge.stats().messages_sent, 0);
    assert_eq!(bridge.stats().bytes_sent, 0);
    assert_eq!(backend.attempts(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
    let mut h = open().await;

    let first = spawn_call(&h.bridge, "first", Duration::from_secs(5));
    let a = h.peer.next_envelope().await.expect("a");
    let second = spawn_call(&h.bridge, "second", Duration::from_secs(5));
    let b = h.peer.next_envelope().await.expect("b");
    assert_ne!(a.id, b.id);
    assert_eq!(h.bridge.pending_count(), 2);

    h.peer.reply(&b, json!({"which": "b"}));
    h.peer.reply(&a, json!({"which": "a"}));

    assert_eq!(second.await.expect("join").expect("ok")["which"], "b");
    assert_eq!(first.await.expect("join").expect("ok")["which"], "a");
}

#[tokio::test]
async fn test_success_false_rejects_call() {
    let mut h = open().await;

    let call = spawn_call(&h.bridge, "save_user", Duration::from_secs(5));
    let request = h.peer.next_envelope().await.expect("request");
    h.peer
        .reply(&request, json!({"success": false, "error": "validation failed"}));

    let err = call.await.expect("join").unwrap_err();
    let Error::Rejected { message, payload, .. } = err else {
        panic!("expected rejection, got {err:?}");
    };
    assert_eq!(message, "validation failed");
    assert_eq!(payload["success"], false);

    let failed = next_matching(&mut h.events, |event| match event {
        BridgeEvent::CallFailed { name, .. } => Some(name),
        _ => None,
    })
    .await;
    assert_eq!(failed, "save_user");
}

#[tokio::test]
async fn test_error_frame_rejects_matching_call() {
    let mut h = open().await;

    let call = spawn_call(&h.bridge, "unknown_op", Duration::from_secs(5));
    let request = h.peer.next_envelope().await.expect("request");
    h.peer.send_json(&json!({
        "id": request.id,
        "error_type": "PROTOCOL_ERROR",
        "message": "Unknown operation",
        "timestamp": 1,
    }));

    let err = call.await.expect("join").unwrap_err();
    assert!(matches!(err, Error::Rejected { ref message, .. } if message == "Unknown operation"));
}

#[tokio::test]
async fn test_too_many_pending_requests() {
    let mut h = open_with(|b| b.max_pending_requests(1)).await;

    let _held = spawn_call(&h.bridge, "held", Duration::from_secs(5));
    h.peer.next_envelope().await.expect("request");

    let err = h
        .bridge
        .call("rejected", json!({}), Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TooManyPending { pending: 1, limit: 1 }));
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[tokio::test]
async fn test_notify_sends_uncorrelated_envelope() {
    let mut h = open().await;

    h.bridge
        .notify("refresh", json!({"all": true}))
        .await
        .expect("notify");

    let envelope = h.peer.next_envelope().await.expect("envelope");
    assert_eq!(envelope.name, "refresh");
    assert_eq!(envelope.payload["all"], true);
    assert_eq!(h.bridge.pending_count(), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_sequence_and_ready() {
    let (connector, mut backend) = memory::channel();
    let bridge = builder(connector).build().expect("build");
    let mut events = bridge.events();

    bridge.connect().expect("connect");
    expect_transition(&mut events, Uninstantiated, Connecting).await;
    expect_transition(&mut events, Connecting, Open).await;

    let peer = backend.accept().await.expect("peer");
    assert_eq!(backend.last_url().expect("url").as_str(), "ws://127.0.0.1:9000/");
    assert!(bridge.stats().connection_start_time.is_some());

    peer.emit("hello", json!({}));
    expect_transition(&mut events, Open, Ready).await;
    assert!(bridge.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_unclean_close_reconnects() {
    let mut h = open().await;

    h.peer.drop_connection();

    let (code, clean) = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Disconnected { code, clean, .. } => Some((code, clean)),
        _ => None,
    })
    .await;
    assert_eq!(code, Some(1006));
    assert!(!clean);

    expect_transition(&mut h.events, Open, Reconnecting).await;
    let (attempt, delay) = next_matching(&mut h.events, |event| match event {
        BridgeEvent::ReconnectScheduled { attempt, delay } => Some((attempt, delay)),
        _ => None,
    })
    .await;
    assert_eq!(attempt, 1);
    assert_eq!(delay, Duration::from_millis(3000));

    expect_transition(&mut h.events, Reconnecting, Connecting).await;
    expect_transition(&mut h.events, Connecting, Open).await;

    let _peer = h.backend.accept().await.expect("second peer");
    assert_eq!(h.backend.attempts(), 2);
    assert_eq!(h.bridge.stats().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_clean_close_does_not_reconnect() {
    let mut h = open().await;

    h.peer.close(CLOSE_NORMAL, "backend shutdown");
    expect_transition(&mut h.events, Open, Closed).await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.bridge.state(), Closed);
    assert_eq!(h.backend.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_end_in_error_until_manual_reconnect() {
    let mut h = open().await;

    h.backend.set_mode(AcceptMode::Refuse);
    h.peer.drop_connection();

    let (attempts, last_error) = next_matching(&mut h.events, |event| match event {
        BridgeEvent::ReconnectFailed {
            attempts,
            last_error,
        } => Some((attempts, last_error)),
        _ => None,
    })
    .await;
    assert_eq!(attempts, 5);
    assert_eq!(
        last_error.expect("last error").kind,
        ErrorKind::ConnectionRefused
    );
    assert_eq!(h.bridge.state(), ConnectionState::Error);
    assert_eq!(h.backend.attempts(), 6);
    assert_eq!(h.bridge.stats().reconnects, 5);

    // No timer left behind
    sleep(Duration::from_secs(600)).await;
    assert_eq!(h.backend.attempts(), 6);
    assert_eq!(h.bridge.state(), ConnectionState::Error);

    h.backend.set_mode(AcceptMode::Accept);
    h.bridge.reconnect().expect("reconnect");
    h.bridge.wait_for_state(Open).await.expect("open");
    let _peer = h.backend.accept().await.expect("peer");

    let stats = h.bridge.stats();
    assert_eq!(stats.reconnects, 0);
    assert_eq!(stats.connect_attempts, 1);
    assert_eq!(stats.errors_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_reconnecting_cancels_retry() {
    let mut h = open().await;

    h.peer.drop_connection();
    expect_transition(&mut h.events, Open, Reconnecting).await;

    h.bridge.disconnect().expect("disconnect");
    expect_transition(&mut h.events, Reconnecting, Closing).await;
    expect_transition(&mut h.events, Closing, Closed).await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.backend.attempts(), 1);
    assert!(
        !drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, BridgeEvent::StateChanged(c) if c.new == Connecting))
    );
}

#[tokio::test]
async fn test_manual_disconnect_closes_with_normal_code() {
    let mut h = open().await;

    h.bridge.disconnect().expect("disconnect");
    expect_transition(&mut h.events, Open, Closing).await;

    let clean = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Disconnected { clean, .. } => Some(clean),
        _ => None,
    })
    .await;
    assert!(clean);
    expect_transition(&mut h.events, Closing, Closed).await;

    assert_eq!(h.peer.client_close_code(), Some(CLOSE_NORMAL));
    assert_eq!(h.backend.attempts(), 1);

    let err = h.bridge.call("x", json!({}), None).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected { state: Closed }));
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_moves_to_error_then_retries() {
    let (connector, backend) = memory::channel();
    backend.set_mode(AcceptMode::Hang);
    let bridge = builder(connector).build().expect("build");
    let mut events = bridge.events();

    let started = Instant::now();
    bridge.connect().expect("connect");
    expect_transition(&mut events, Uninstantiated, Connecting).await;
    expect_transition(&mut events, Connecting, ConnectionState::Error).await;
    assert!(started.elapsed() >= Duration::from_secs(10));

    let last = bridge.last_error().expect("last error");
    assert_eq!(last.kind, ErrorKind::ConnectionTimeout);

    // Passing through Error with retries left is not a permanent failure
    let mut gave_up = false;
    next_matching(&mut events, |event| match event {
        BridgeEvent::ReconnectFailed { .. } => {
            gave_up = true;
            None
        }
        BridgeEvent::StateChanged(change) => {
            assert_eq!((change.old, change.new), (ConnectionState::Error, Reconnecting));
            Some(())
        }
        _ => None,
    })
    .await;
    assert!(!gave_up);
    assert_eq!(bridge.state(), Reconnecting);
}

#[tokio::test]
async fn test_auto_reconnect_disabled_goes_to_error() {
    let mut h = open_with(|b| b.auto_reconnect(false)).await;

    h.peer.drop_connection();
    expect_transition(&mut h.events, Open, ConnectionState::Error).await;

    let record = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Error(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(record.kind, ErrorKind::SocketError);
    assert_eq!(h.backend.attempts(), 1);
}

#[tokio::test]
async fn test_initial_refusal_schedules_retry() {
    let (connector, backend) = memory::channel();
    backend.set_mode(AcceptMode::Refuse);
    let bridge = builder(connector).build().expect("build");
    let mut events = bridge.events();

    bridge.connect().expect("connect");
    expect_transition(&mut events, Uninstantiated, Connecting).await;
    expect_transition(&mut events, Connecting, Reconnecting).await;
    assert_eq!(
        bridge.last_error().expect("last error").kind,
        ErrorKind::ConnectionRefused
    );
}

#[tokio::test]
async fn test_shutdown_rejects_pending_calls() {
    let mut h = open().await;

    let call = spawn_call(&h.bridge, "long", Duration::from_secs(60));
    h.peer.next_envelope().await.expect("request");

    h.bridge.shutdown().await;

    assert!(matches!(call.await.expect("join"), Err(Error::BridgeClosed)));
    assert!(h.bridge.is_closed());
    assert!(matches!(h.bridge.connect(), Err(Error::BridgeClosed)));
    assert!(matches!(
        h.bridge.call("after", json!({}), None).await,
        Err(Error::BridgeClosed)
    ));
    assert_eq!(h.peer.client_close_code(), Some(CLOSE_NORMAL));

    // Idempotent
    h.bridge.shutdown().await;
}

// ============================================================================
// Inbound Routing
// ============================================================================

#[tokio::test]
async fn test_events_reach_subscribers() {
    let mut h = open().await;

    let named = Arc::new(AtomicUsize::new(0));
    let all = Arc::new(AtomicUsize::new(0));
    let seen_named = Arc::clone(&named);
    let seen_all = Arc::clone(&all);

    let id = h.bridge.on("user_updated", move |event| {
        assert_eq!(event.payload["id"], 7);
        seen_named.fetch_add(1, Ordering::SeqCst);
    });
    h.bridge.on_any(move |_| {
        seen_all.fetch_add(1, Ordering::SeqCst);
    });

    h.peer.emit("user_updated", json!({"id": 7}));
    let message = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Message(envelope) => Some(envelope),
        _ => None,
    })
    .await;
    assert_eq!(message.name, "user_updated");
    assert_eq!(named.load(Ordering::SeqCst), 1);

    assert!(h.bridge.off(id));
    h.peer.emit("user_updated", json!({"id": 7}));
    next_matching(&mut h.events, |event| match event {
        BridgeEvent::Message(_) => Some(()),
        _ => None,
    })
    .await;

    assert_eq!(named.load(Ordering::SeqCst), 1);
    assert_eq!(all.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_malformed_frames_are_reported_and_stream_continues() {
    let mut h = open().await;

    h.peer.send_text("{definitely not json");
    let record = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Error(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(record.kind, ErrorKind::ParseError);
    assert_eq!(
        record.details.expect("details")["raw_message"],
        "{definitely not json"
    );

    h.peer.send_binary(vec![0xc3, 0x28]);
    let record = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Error(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(record.kind, ErrorKind::ParseError);

    h.peer.send_json(&json!({"unexpected": true}));
    let record = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Error(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(record.kind, ErrorKind::ProtocolError);

    h.peer.emit("still_alive", json!({}));
    let message = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Message(envelope) => Some(envelope),
        _ => None,
    })
    .await;
    assert_eq!(message.name, "still_alive");

    assert!(h.bridge.is_connected());
    assert_eq!(h.bridge.stats().errors_count, 3);
    assert_eq!(
        h.bridge.last_error().expect("last error").kind,
        ErrorKind::ProtocolError
    );
}

#[tokio::test]
async fn test_backend_error_frame_becomes_error_event() {
    let mut h = open().await;

    h.peer.send_json(&json!({
        "id": "parse_error",
        "error_type": "JSON_PARSE_ERROR",
        "message": "Invalid JSON format",
        "details": {"raw_message": "{"},
        "timestamp": 1,
    }));

    let record = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Error(record) => Some(record),
        _ => None,
    })
    .await;
    assert_eq!(record.kind, ErrorKind::ParseError);
    assert_eq!(record.message, "Invalid JSON format");
}

#[tokio::test]
async fn test_binary_json_frame_is_dispatched() {
    let mut h = open().await;

    h.peer
        .send_binary(br#"{"name":"from_binary","payload":{"ok":true}}"#.to_vec());
    let message = next_matching(&mut h.events, |event| match event {
        BridgeEvent::Message(envelope) => Some(envelope),
        _ => None,
    })
    .await;
    assert_eq!(message.name, "from_binary");
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_pings_until_disabled() {
    let mut h = open_with(|b| b.heartbeat_interval(Duration::from_secs(1))).await;

    let frame = h.peer.next_frame().await.expect("ping");
    let Ok(Frame::Control(ping)) = decode(&frame) else {
        panic!("expected control frame, got {frame}");
    };
    assert_eq!(ping.kind, ControlKind::Ping);
    assert!(h.bridge.stats().messages_sent >= 1);

    h.bridge.set_heartbeat(false).expect("toggle");
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.peer.try_next_frame(), None);

    h.bridge.set_heartbeat(true).expect("toggle");
    assert!(h.peer.next_frame().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_stops_when_connection_lost() {
    let mut h = open_with(|b| {
        b.heartbeat_interval(Duration::from_secs(1))
            .initial_reconnect_interval(Duration::from_secs(60))
            .max_reconnect_interval(Duration::from_secs(60))
    })
    .await;

    h.peer.drop_connection();
    expect_transition(&mut h.events, Open, Reconnecting).await;

    let sent = h.bridge.stats().messages_sent;
    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.bridge.stats().messages_sent, sent);
}

#[tokio::test]
async fn test_control_frames_are_not_events() {
    let mut h = open().await;

    h.peer.send_json(&json!({"type": "pong", "timestamp": 1}));
    h.peer.send_json(&json!({"type": "ping", "timestamp": 2}));

    let pong = h.peer.next_frame().await.expect("pong");
    let Ok(Frame::Control(pong)) = decode(&pong) else {
        panic!("expected pong");
    };
    assert_eq!(pong.kind, ControlKind::Pong);

    assert!(
        !drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, BridgeEvent::Message(_) | BridgeEvent::Error(_)))
    );
}
