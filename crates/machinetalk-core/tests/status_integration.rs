//! End-to-end StatusClient lifecycle test against a real loopback PUB peer,
//! in the style of hooteproto's socket roundtrip tests but thread-based
//! rather than tokio-based, matching this crate's synchronous I/O model.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use machinetalk_core::{Container, EmcStatusMotion, MessageType, ProtocolParams, StatusClient};

static PORT: AtomicU16 = AtomicU16::new(19100);

fn next_endpoint() -> String {
    let port = PORT.fetch_add(1, Ordering::SeqCst);
    format!("tcp://127.0.0.1:{port}")
}

fn full_update(topic: &str) -> Container {
    Container {
        message_type: Some(MessageType::EmcstatFullUpdate),
        emc_status_motion: if topic == "motion" {
            Some(EmcStatusMotion::default())
        } else {
            None
        },
        pparams: if topic == "motion" {
            Some(ProtocolParams { keepalive_timer: 1000 })
        } else {
            None
        },
        ..Default::default()
    }
}

/// Publishes each channel's full update repeatedly, checking `done` between
/// rounds, until either `done` holds or `timeout` elapses. Re-publishing
/// (rather than a single send after a fixed settle sleep) sidesteps the
/// PUB/SUB "slow joiner" problem.
fn publish_until(pub_socket: &zmq::Socket, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let topics = ["motion", "config", "io", "task", "interp"];
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        for topic in topics {
            let body = full_update(topic).encode();
            let _ = pub_socket.send_multipart([topic.as_bytes(), body.as_slice()], 0);
        }
        std::thread::sleep(Duration::from_millis(30));
    }
    done()
}

#[test]
fn status_client_connects_and_syncs_against_a_real_peer() {
    let endpoint = next_endpoint();
    let ctx = zmq::Context::new();
    let pub_socket = ctx.socket(zmq::PUB).unwrap();
    pub_socket.bind(&endpoint).unwrap();

    let client = StatusClient::new();
    client.set_status_uri(&endpoint);
    client.start().expect("status client start");

    assert!(
        publish_until(&pub_socket, Duration::from_secs(3), || client.synced()),
        "expected StatusClient to reach synced=true"
    );
    assert_eq!(client.state(), machinetalk_core::ConnectionState::Connected);
    assert!(client.connected());

    client.stop();
    assert_eq!(client.state(), machinetalk_core::ConnectionState::Disconnected);
}

#[test]
fn status_client_restarts_after_stop() {
    let endpoint = next_endpoint();
    let ctx = zmq::Context::new();
    let pub_socket = ctx.socket(zmq::PUB).unwrap();
    pub_socket.bind(&endpoint).unwrap();

    let client = StatusClient::new();
    client.set_status_uri(&endpoint);

    client.start().expect("first start");
    assert!(publish_until(&pub_socket, Duration::from_secs(2), || {
        client.connected()
    }));
    client.stop();

    client.start().expect("restart after stop");
    assert!(
        publish_until(&pub_socket, Duration::from_secs(2), || client.connected()),
        "expected StatusClient to reconnect after stop()/start()"
    );
    client.stop();
}
