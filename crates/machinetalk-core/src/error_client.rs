//! ErrorClient: subscribe-and-buffer delivery of asynchronous controller
//! notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use crate::keepalive::Timer;
use crate::message::{Container, MessageType};
use crate::socket::{self, POLL_TIMEOUT};
use crate::state::{ConnectionState, ConnectionStateCell, SocketState, SocketStateCell};

const TOPICS: [&str; 3] = ["error", "text", "display"];

/// One buffered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: MessageType,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Effect {
    None,
    Resubscribe,
}

pub(crate) struct Inner {
    state: ConnectionStateCell,
    socket_state: SocketStateCell,
    buffer: Mutex<Vec<Entry>>,
    subscribed: Mutex<bool>,
    keepalive: Timer,
    keepalive_duration: Mutex<Option<Duration>>,
}

impl Inner {
    fn new(weak: Weak<Inner>) -> Self {
        let timer_weak = weak.clone();
        Inner {
            state: ConnectionStateCell::new(ConnectionState::Disconnected),
            socket_state: SocketStateCell::new(SocketState::Down),
            buffer: Mutex::new(Vec::new()),
            subscribed: Mutex::new(false),
            keepalive: Timer::spawn("error-keepalive", move || {
                if let Some(inner) = timer_weak.upgrade() {
                    on_keepalive_expiry(&inner);
                }
            }),
            keepalive_duration: Mutex::new(None),
        }
    }
}

fn on_keepalive_expiry(inner: &Inner) {
    warn!("error: keepalive expired, declaring timeout");
    inner.socket_state.set(SocketState::Down);
    inner.state.set(ConnectionState::Timeout);
}

fn arm_keepalive(inner: &Inner, millis: u64) {
    let duration = Duration::from_millis(millis);
    *inner.keepalive_duration.lock().unwrap() = Some(duration);
    inner.keepalive.arm_once(duration);
}

fn refresh_keepalive(inner: &Inner) {
    if let Some(duration) = *inner.keepalive_duration.lock().unwrap() {
        inner.keepalive.arm_once(duration);
    }
}

fn is_notification(message_type: MessageType) -> bool {
    matches!(
        message_type,
        MessageType::NmlError
            | MessageType::NmlText
            | MessageType::NmlDisplay
            | MessageType::OperatorError
            | MessageType::OperatorText
            | MessageType::OperatorDisplay
    )
}

fn handle_ping(inner: &Inner, container: &Container) -> Effect {
    let was_timeout = inner.state.get() == ConnectionState::Timeout;

    if let Some(pparams) = container.pparams {
        arm_keepalive(inner, pparams.keepalive_timer * 2);
    }

    if inner.socket_state.get() == SocketState::Up {
        refresh_keepalive(inner);
        return Effect::None;
    }

    if was_timeout {
        // Recovering from a prior timeout: go through unsubscribe+
        // resubscribe to solicit a fresh snapshot.
        inner.state.set(ConnectionState::Connecting);
        Effect::Resubscribe
    } else {
        inner.socket_state.set(SocketState::Up);
        inner.state.set(ConnectionState::Connected);
        info!("error: connected");
        Effect::None
    }
}

/// Decodes one message into a notification entry, appended exactly once
/// per message regardless of how many `notes` it carries — fixing the
/// per-note duplicate-append defect in the source this was ported from.
pub(crate) fn apply(inner: &Inner, container: &Container) -> Effect {
    match container.message_type() {
        Some(kind) if is_notification(kind) => {
            inner.buffer.lock().unwrap().push(Entry {
                kind,
                notes: container.notes.clone(),
            });
            refresh_keepalive(inner);
            Effect::None
        }
        Some(MessageType::Ping) => handle_ping(inner, container),
        Some(other) => {
            debug!(?other, "error: unrecognized message type");
            Effect::None
        }
        None => {
            warn!("error: message with no type discriminator");
            Effect::None
        }
    }
}

/// Subscribes to the three notification topics and buffers incoming
/// messages for pull-based delivery.
pub struct ErrorClient {
    inner: Arc<Inner>,
    uri: Mutex<Option<String>>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ErrorClient {
    pub fn new() -> Self {
        ErrorClient {
            inner: Arc::new_cyclic(Inner::new),
            uri: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn set_error_uri(&self, uri: impl Into<String>) {
        *self.uri.lock().unwrap() = Some(uri.into());
    }

    pub fn ready(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            Ok(())
        } else {
            self.start()
        }
    }

    /// Connects the subscriber socket, subscribes the three notification
    /// topics, and launches the I/O worker. Socket/thread construction
    /// failures are returned rather than panicking; calling this before
    /// [`Self::set_error_uri`] is a programmer error and panics.
    pub fn start(&self) -> anyhow::Result<()> {
        let uri = self
            .uri
            .lock()
            .unwrap()
            .clone()
            .expect("error_uri must be set before start()");

        self.inner.state.set(ConnectionState::Connecting);
        self.shutdown.store(false, Ordering::Release);

        let ctx = zmq::Context::new();
        let sub = socket::create_subscriber(&ctx, &uri)?;
        subscribe_all(&sub, &self.inner);

        let inner = Arc::clone(&self.inner);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name("error-io".to_string())
            .spawn(move || run_worker(sub, inner, shutdown))
            .context("spawn error I/O worker")?;

        *self.worker.lock().unwrap() = Some(handle);
        info!("error: started");
        Ok(())
    }

    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.keepalive.cancel();
        *self.inner.subscribed.lock().unwrap() = false;
        self.inner.state.set(ConnectionState::Disconnected);
        self.started.store(false, Ordering::Release);
        info!("error: stopped");
    }

    pub fn connected(&self) -> bool {
        self.inner.state.get() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Atomically returns the buffered notifications and clears the
    /// buffer. Idempotent: calling twice with nothing in between yields
    /// an empty second result.
    pub fn get_messages(&self) -> Vec<Entry> {
        std::mem::take(&mut *self.inner.buffer.lock().unwrap())
    }
}

impl Default for ErrorClient {
    fn default() -> Self {
        Self::new()
    }
}

fn subscribe_all(socket: &zmq::Socket, inner: &Inner) {
    for topic in TOPICS {
        let _ = socket::subscribe(socket, topic);
    }
    *inner.subscribed.lock().unwrap() = true;
}

fn unsubscribe_all(socket: &zmq::Socket, inner: &Inner) {
    for topic in TOPICS {
        let _ = socket::unsubscribe(socket, topic);
    }
    *inner.subscribed.lock().unwrap() = false;
}

fn run_worker(socket: zmq::Socket, inner: Arc<Inner>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        match socket::poll_readable(&socket, POLL_TIMEOUT) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                warn!(%err, "error: poll failed");
                continue;
            }
        }

        let _topic = match socket.recv_bytes(0) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "error: topic frame recv failed");
                continue;
            }
        };
        let body = match socket.recv_bytes(0) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "error: body frame recv failed");
                continue;
            }
        };

        let container = match Container::decode(&body) {
            Ok(container) => container,
            Err(err) => {
                warn!(%err, "error: undecodable payload");
                continue;
            }
        };

        if apply(&inner, &container) == Effect::Resubscribe {
            unsubscribe_all(&socket, &inner);
            subscribe_all(&socket, &inner);
        }
    }
}
