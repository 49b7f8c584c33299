//! End-to-end ErrorClient test: a real loopback PUB peer publishes a
//! multi-note notification followed by a single-note one, and
//! `get_messages()` must return exactly one buffered entry per message
//! (the corrected, non-duplicating drain behavior).

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use machinetalk_core::{Container, ErrorClient, MessageType};

static PORT: AtomicU16 = AtomicU16::new(19300);

fn next_endpoint() -> String {
    let port = PORT.fetch_add(1, Ordering::SeqCst);
    format!("tcp://127.0.0.1:{port}")
}

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn error_client_buffers_one_entry_per_message() {
    let endpoint = next_endpoint();
    let ctx = zmq::Context::new();
    let pub_socket = ctx.socket(zmq::PUB).unwrap();
    pub_socket.bind(&endpoint).unwrap();

    let client = ErrorClient::new();
    client.set_error_uri(&endpoint);
    client.start().expect("error client start");

    let text = Container {
        message_type: Some(MessageType::OperatorText),
        notes: vec!["a".to_string(), "b".to_string()],
        ..Default::default()
    };
    let error = Container {
        message_type: Some(MessageType::NmlError),
        notes: vec!["x".to_string()],
        ..Default::default()
    };

    // Re-publish until the subscriber catches up (slow-joiner workaround);
    // only a handful of sends will actually land once subscribed.
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut entries = Vec::new();
    while Instant::now() < deadline {
        let text_bytes = text.encode();
        let error_bytes = error.encode();
        let _ = pub_socket.send_multipart(["text".as_bytes(), text_bytes.as_slice()], 0);
        let _ = pub_socket.send_multipart(["error".as_bytes(), error_bytes.as_slice()], 0);
        std::thread::sleep(Duration::from_millis(30));
        if wait_until(
            || {
                entries = client.get_messages();
                !entries.is_empty()
            },
            Duration::from_millis(50),
        ) {
            break;
        }
    }

    assert!(!entries.is_empty(), "expected at least one drained entry");
    for entry in &entries {
        match entry.kind {
            MessageType::OperatorText => {
                assert_eq!(entry.notes, vec!["a".to_string(), "b".to_string()])
            }
            MessageType::NmlError => assert_eq!(entry.notes, vec!["x".to_string()]),
            other => panic!("unexpected entry kind {other:?}"),
        }
    }

    let second = client.get_messages();
    assert!(
        second.is_empty() || second.iter().all(|e| entries.contains(e)),
        "drain should not invent new entries without new messages"
    );

    client.stop();
}
