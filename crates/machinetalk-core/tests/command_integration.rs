//! End-to-end CommandClient lifecycle test against a real loopback ROUTER
//! peer: verifies the ping/ping-acknowledge heartbeat brings the client to
//! `Connected`, and that a command sent afterwards actually reaches the
//! peer with its tx container cleared.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use machinetalk_core::{CommandClient, Container, MessageType, TaskMode};

static PORT: AtomicU16 = AtomicU16::new(19200);

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

/// A minimal fake peer: replies `PING_ACKNOWLEDGE` to every `PING`, and
/// records every other command frame it receives.
fn spawn_fake_peer(
    endpoint: String,
    received: Arc<std::sync::Mutex<Vec<Container>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let ctx = zmq::Context::new();
        let router = ctx.socket(zmq::ROUTER).unwrap();
        router.bind(&endpoint).unwrap();

        loop {
            let mut items = [router.as_poll_item(zmq::POLLIN)];
            let n = zmq::poll(&mut items, 200).unwrap_or(0);
            if n == 0 || !items[0].is_readable() {
                continue;
            }
            let frames = match router.recv_multipart(0) {
                Ok(f) => f,
                Err(_) => return,
            };
            // ROUTER frames: [identity, body]
            let (identity, body) = match frames.as_slice() {
                [identity, body] => (identity.clone(), body.clone()),
                _ => continue,
            };
            let container = match Container::decode(&body) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if container.message_type() == Some(MessageType::Ping) {
                let ack = Container {
                    message_type: Some(MessageType::PingAcknowledge),
                    ..Default::default()
                };
                let ack_bytes = ack.encode();
                let _ = router.send_multipart([identity.as_slice(), ack_bytes.as_slice()], 0);
            } else {
                received.lock().unwrap().push(container);
            }
        }
    })
}

#[test]
fn command_client_connects_via_heartbeat_and_sends_commands() {
    let endpoint = next_endpoint();
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _peer = spawn_fake_peer(endpoint.clone(), Arc::clone(&received));

    let client = CommandClient::new();
    client.set_command_uri(&endpoint);
    client.set_heartbeat_period(Duration::from_millis(100));
    client.start().expect("command client start");

    assert!(
        wait_until(|| client.connected(), Duration::from_secs(2)),
        "expected CommandClient to reach Connected via ping/ack"
    );

    assert!(client.set_task_mode("emcmod", TaskMode::Mdi));

    assert!(wait_until(
        || !received.lock().unwrap().is_empty(),
        Duration::from_secs(1)
    ));
    let messages = received.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_type(), Some(MessageType::TaskSetMode));
    assert_eq!(
        messages[0].emc_command_params.as_ref().unwrap().task_mode,
        Some(TaskMode::Mdi)
    );

    client.stop();
}
