//! JSON-Lines Protocol Tests
//!
//! Exercises `TransportConnection` against scripted mock devices:
//! framing across partial reads, telemetry fan-out, timeouts, link loss and
//! the single response slot shared by overlapping commands.
//!
//! Run with: `cargo test --test transport_protocol`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use yantra_io::Error;
use yantra_io::protocol::{Command, Response};
use yantra_io::transport::{
    LinkEvent, MockPortProvider, MockTransport, PortInfo, PortKind, PortProvider,
    TransportConnection,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn port() -> PortInfo {
    PortInfo::new(PortKind::Mock, "bench", "bench")
}

fn connect(mock: &MockTransport) -> TransportConnection {
    TransportConnection::with_transport(port(), Box::new(mock.clone())).unwrap()
}

/// Poll until `cond` holds or a second passes.
fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn test_response_split_across_reads() {
    let mock = MockTransport::new();
    let conn = Arc::new(connect(&mock));

    let sender = Arc::clone(&conn);
    let waiter = thread::spawn(move || sender.send_command(&Command::new("get_info"), TIMEOUT));
    assert!(wait_until(|| mock.written_lines().len() == 1));

    mock.inject_read(br#"{"status":"o"#);
    thread::sleep(Duration::from_millis(30));
    mock.inject_read(b"k\",\"firmware\":\"2.1\"}\r\n");

    let response = waiter.join().unwrap().unwrap();
    assert!(response.is_ok());
    assert_eq!(response.field("firmware"), Some(&json!("2.1")));
}

#[test]
fn test_written_line_is_newline_terminated_json() {
    let mock = MockTransport::with_responder(|_| Some(r#"{"status":"ok"}"#.to_string()));
    let conn = connect(&mock);
    conn.send_command(&Command::drive(120, -40), TIMEOUT).unwrap();

    let written = mock.get_written();
    assert_eq!(written.last(), Some(&b'\n'));
    let value: Value = serde_json::from_slice(&written[..written.len() - 1]).unwrap();
    assert_eq!(value, json!({"action": "drive", "left": 120, "right": -40}));
}

// ============================================================================
// Listeners
// ============================================================================

#[test]
fn test_telemetry_fans_out_without_completing_command() {
    let mock = MockTransport::new();
    let conn = Arc::new(connect(&mock));
    let events = conn.subscribe();

    let sender = Arc::clone(&conn);
    let waiter = thread::spawn(move || sender.send_command(&Command::new("read_sensors"), TIMEOUT));
    assert!(wait_until(|| mock.written_lines().len() == 1));

    mock.inject_line(r#"{"type":"telemetry","battery":87}"#);
    mock.inject_line("not json at all");
    mock.inject_line(r#"{"status":"ok","front":42}"#);

    let response = waiter.join().unwrap().unwrap();
    assert_eq!(response.field("front"), Some(&json!(42)));

    assert!(wait_until(|| events.receiver().len() >= 2));
    let messages: Vec<Value> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            LinkEvent::Message { value } => Some(value),
            LinkEvent::Closed { .. } => None,
        })
        .collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["type"], "telemetry");
    assert_eq!(messages[1]["status"], "ok");
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_silent_device_times_out_and_link_survives() {
    let replies = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&replies);
    // Ignores the first command, answers the rest
    let mock = MockTransport::with_responder(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            None
        } else {
            Some(r#"{"status":"ok"}"#.to_string())
        }
    });
    let conn = connect(&mock);

    let err = conn
        .send_command(&Command::new("get_info"), Duration::from_millis(80))
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { ref action, timeout_ms: 80 } if action == "get_info"));

    assert!(conn.is_connected());
    assert!(conn.send_command(&Command::new("get_info"), TIMEOUT).unwrap().is_ok());
}

#[test]
fn test_read_failure_drops_link() {
    let mock = MockTransport::new();
    let conn = Arc::new(connect(&mock));
    let events = conn.subscribe();
    let lost = Arc::new(AtomicUsize::new(0));
    let lost_clone = Arc::clone(&lost);
    conn.set_on_lost(Box::new(move |_| {
        lost_clone.fetch_add(1, Ordering::SeqCst);
    }));

    let sender = Arc::clone(&conn);
    let waiter = thread::spawn(move || sender.send_command(&Command::new("read_gpio"), TIMEOUT));
    assert!(wait_until(|| mock.written_lines().len() == 1));
    mock.fail_reads();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert!(wait_until(|| !conn.is_connected()));
    assert!(wait_until(|| lost.load(Ordering::SeqCst) == 1));
    assert!(mock.is_closed());
    assert!(wait_until(|| events
        .drain()
        .iter()
        .any(|e| matches!(e, LinkEvent::Closed { .. }))));

    let err = conn.send_command(&Command::new("get_info"), TIMEOUT).unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[test]
fn test_disconnect_releases_and_closes_port() {
    let mock = MockTransport::new();
    let conn = connect(&mock);
    conn.disconnect();
    assert!(mock.is_closed());
    assert!(!conn.is_connected());
    conn.disconnect();

    let err = conn.send_command(&Command::new("get_info"), TIMEOUT).unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[test]
fn test_provider_without_port_fails_to_connect() {
    let provider = MockPortProvider::new();
    assert!(provider.enumerate().unwrap().is_empty());
    let result = TransportConnection::connect(&provider, &port());
    assert!(matches!(result, Err(Error::Connection(_))));
}

// ============================================================================
// Overlapping commands
// ============================================================================

/// Two commands issued without awaiting the first.
///
/// Responses carry no id and the connection keeps a single slot, so the
/// second command takes the slot over. The first caller fails immediately
/// with `ResponseSlotReplaced`; the second caller receives the next response
/// line, which here is the device's reply to the *first* command. The reply
/// to the second command then reaches listeners only.
#[test]
fn test_back_to_back_commands_share_one_slot() {
    let mock = MockTransport::new();
    let conn = Arc::new(connect(&mock));
    let events = conn.subscribe();

    let first_conn = Arc::clone(&conn);
    let first = thread::spawn(move || first_conn.send_command(&Command::new("read_gpio"), TIMEOUT));
    assert!(wait_until(|| mock.written_lines().len() == 1));

    let second_conn = Arc::clone(&conn);
    let second = thread::spawn(move || second_conn.send_command(&Command::new("get_info"), TIMEOUT));

    // Both commands are on the wire, in order; nothing was queued
    assert!(wait_until(|| mock.written_lines().len() == 2));
    let lines = mock.written_lines();
    assert!(lines[0].contains("read_gpio"));
    assert!(lines[1].contains("get_info"));

    let first_result = first.join().unwrap();
    assert!(matches!(first_result, Err(Error::ResponseSlotReplaced)));

    mock.inject_line(r#"{"status":"ok","reply_to":"read_gpio"}"#);
    mock.inject_line(r#"{"status":"ok","reply_to":"get_info"}"#);

    let second_result: Response = second.join().unwrap().unwrap();
    assert_eq!(second_result.field("reply_to"), Some(&json!("read_gpio")));

    assert!(wait_until(|| events.receiver().len() >= 2));
    let replies: Vec<Value> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            LinkEvent::Message { value } => Some(value["reply_to"].clone()),
            LinkEvent::Closed { .. } => None,
        })
        .collect();
    assert_eq!(replies, vec![json!("read_gpio"), json!("get_info")]);
}
