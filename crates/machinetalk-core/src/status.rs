//! StatusClient: subscribe-and-merge replica of the controller's five
//! status channels.
//!
//! Message decoding and socket I/O live on the worker thread; the merge
//! logic in [`apply`] is a pure function of `&Inner` and a decoded
//! [`Container`] so it can be unit-tested without a live peer, per the
//! testability note in SPEC_FULL.md §2.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use crate::domain::{EmcStatusConfig, EmcStatusInterp, EmcStatusIo, EmcStatusMotion, EmcStatusTask, MergeFrom};
use crate::keepalive::Timer;
use crate::message::{Container, MessageType};
use crate::socket::{self, POLL_TIMEOUT};
use crate::state::{ConnectionState, ConnectionStateCell, SocketState, SocketStateCell};

/// One of the five logical status channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Motion,
    Config,
    Io,
    Task,
    Interp,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Motion,
        Channel::Config,
        Channel::Io,
        Channel::Task,
        Channel::Interp,
    ];

    fn topic(self) -> &'static str {
        match self {
            Channel::Motion => "motion",
            Channel::Config => "config",
            Channel::Io => "io",
            Channel::Task => "task",
            Channel::Interp => "interp",
        }
    }

    fn from_topic(topic: &str) -> Option<Channel> {
        match topic {
            "motion" => Some(Channel::Motion),
            "config" => Some(Channel::Config),
            "io" => Some(Channel::Io),
            "task" => Some(Channel::Task),
            "interp" => Some(Channel::Interp),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Mirrors {
    motion: Mutex<EmcStatusMotion>,
    config: Mutex<EmcStatusConfig>,
    io: Mutex<EmcStatusIo>,
    task: Mutex<EmcStatusTask>,
    interp: Mutex<EmcStatusInterp>,
}

impl Mirrors {
    fn clear_all(&self) {
        self.motion.lock().unwrap().clear();
        self.config.lock().unwrap().clear();
        self.io.lock().unwrap().clear();
        self.task.lock().unwrap().clear();
        self.interp.lock().unwrap().clear();
    }

    fn clear(&self, channel: Channel) {
        match channel {
            Channel::Motion => self.motion.lock().unwrap().clear(),
            Channel::Config => self.config.lock().unwrap().clear(),
            Channel::Io => self.io.lock().unwrap().clear(),
            Channel::Task => self.task.lock().unwrap().clear(),
            Channel::Interp => self.interp.lock().unwrap().clear(),
        }
    }
}

/// Effect a dispatch must cause on the real socket. Kept out of [`apply`]
/// so dispatch stays socket-free and unit-testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Effect {
    None,
    Resubscribe,
}

pub(crate) struct Inner {
    state: ConnectionStateCell,
    socket_state: SocketStateCell,
    mirrors: Mirrors,
    sync_set: Mutex<HashSet<Channel>>,
    subscribed: Mutex<Vec<Channel>>,
    keepalive: Timer,
    keepalive_duration: Mutex<Option<Duration>>,
}

impl Inner {
    fn new(weak: Weak<Inner>) -> Self {
        let timer_weak = weak.clone();
        Inner {
            state: ConnectionStateCell::new(ConnectionState::Disconnected),
            socket_state: SocketStateCell::new(SocketState::Down),
            mirrors: Mirrors::default(),
            sync_set: Mutex::new(HashSet::new()),
            subscribed: Mutex::new(Vec::new()),
            keepalive: Timer::spawn("status-keepalive", move || {
                if let Some(inner) = timer_weak.upgrade() {
                    on_keepalive_expiry(&inner);
                }
            }),
            keepalive_duration: Mutex::new(None),
        }
    }
}

fn on_keepalive_expiry(inner: &Inner) {
    warn!("status: keepalive expired, declaring timeout");
    inner.socket_state.set(SocketState::Down);
    transition_state(inner, ConnectionState::Timeout);
}

/// Applies the exit-from-Connected invariants (heartbeat stop, sync-set
/// clear, and mirror clear unless the new state is `Timeout`) and records
/// the new state.
fn transition_state(inner: &Inner, new_state: ConnectionState) {
    let prev = inner.state.set(new_state);
    if prev == ConnectionState::Connected && new_state != ConnectionState::Connected {
        inner.keepalive.cancel();
        inner.sync_set.lock().unwrap().clear();
        if new_state != ConnectionState::Timeout {
            inner.mirrors.clear_all();
        }
    }
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

fn merge_channel(inner: &Inner, channel: Channel, container: &Container) {
    match channel {
        Channel::Motion => {
            if let Some(update) = &container.emc_status_motion {
                inner.mirrors.motion.lock().unwrap().merge_from(update);
            }
        }
        Channel::Config => {
            if let Some(update) = &container.emc_status_config {
                inner.mirrors.config.lock().unwrap().merge_from(update);
            }
        }
        Channel::Io => {
            if let Some(update) = &container.emc_status_io {
                inner.mirrors.io.lock().unwrap().merge_from(update);
            }
        }
        Channel::Task => {
            if let Some(update) = &container.emc_status_task {
                inner.mirrors.task.lock().unwrap().merge_from(update);
            }
        }
        Channel::Interp => {
            if let Some(update) = &container.emc_status_interp {
                inner.mirrors.interp.lock().unwrap().merge_from(update);
            }
        }
    }
}

fn handle_update(inner: &Inner, container: &Container, full: bool) {
    let Some(channel) = container.topic.as_deref().and_then(Channel::from_topic) else {
        warn!("status: update without a recognizable channel topic");
        return;
    };

    merge_channel(inner, channel, container);

    if full {
        inner.sync_set.lock().unwrap().insert(channel);
        if inner.socket_state.get() != SocketState::Up {
            inner.socket_state.set(SocketState::Up);
            transition_state(inner, ConnectionState::Connected);
            info!("status: connected");
        }
        if let Some(pparams) = container.pparams {
            arm_keepalive(inner, pparams.keepalive_timer * 2);
        }
    } else {
        refresh_keepalive(inner);
    }
}

fn handle_ping(inner: &Inner) -> Effect {
    if inner.socket_state.get() == SocketState::Up {
        refresh_keepalive(inner);
        Effect::None
    } else {
        transition_state(inner, ConnectionState::Connecting);
        Effect::Resubscribe
    }
}

pub(crate) fn apply(inner: &Inner, container: &Container) -> Effect {
    match container.message_type() {
        Some(MessageType::EmcstatFullUpdate) => {
            handle_update(inner, container, true);
            Effect::None
        }
        Some(MessageType::EmcstatIncrementalUpdate) => {
            handle_update(inner, container, false);
            Effect::None
        }
        Some(MessageType::Ping) => handle_ping(inner),
        Some(other) => {
            debug!(?other, "status: unrecognized message type");
            Effect::None
        }
        None => {
            warn!("status: message with no type discriminator");
            Effect::None
        }
    }
}

/// A live replica of the controller's five status channels.
pub struct StatusClient {
    inner: Arc<Inner>,
    uri: Mutex<Option<String>>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl StatusClient {
    pub fn new() -> Self {
        StatusClient {
            inner: Arc::new_cyclic(Inner::new),
            uri: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn set_status_uri(&self, uri: impl Into<String>) {
        *self.uri.lock().unwrap() = Some(uri.into());
    }

    /// Idempotent first-call trigger: runs `start()` at most once.
    pub fn ready(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            Ok(())
        } else {
            self.start()
        }
    }

    /// Connects the subscriber socket, subscribes the five channel topics,
    /// and launches the I/O worker. Socket/thread construction failures are
    /// returned rather than panicking, since a library should not abort its
    /// caller's process; calling this before [`Self::set_status_uri`] is a
    /// programmer error and panics.
    pub fn start(&self) -> anyhow::Result<()> {
        let uri = self
            .uri
            .lock()
            .unwrap()
            .clone()
            .expect("status_uri must be set before start()");

        self.inner.state.set(ConnectionState::Connecting);
        self.shutdown.store(false, Ordering::Release);

        let ctx = zmq::Context::new();
        let sub = socket::create_subscriber(&ctx, &uri)?;
        subscribe_all(&sub, &self.inner);

        let inner = Arc::clone(&self.inner);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name("status-io".to_string())
            .spawn(move || run_worker(sub, inner, shutdown))
            .context("spawn status I/O worker")?;

        *self.worker.lock().unwrap() = Some(handle);
        info!("status: started");
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
        unsubscribe_all(&self.inner);
        transition_state(&self.inner, ConnectionState::Disconnected);
        self.started.store(false, Ordering::Release);
        info!("status: stopped");
    }

    pub fn connected(&self) -> bool {
        self.inner.state.get() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn synced(&self) -> bool {
        self.inner.sync_set.lock().unwrap().len() == Channel::ALL.len()
    }

    pub fn running(&self) -> bool {
        let task = self.inner.mirrors.task.lock().unwrap();
        let interp = self.inner.mirrors.interp.lock().unwrap();
        let mode_runs = matches!(
            task.task_mode,
            Some(crate::domain::TaskMode::Auto) | Some(crate::domain::TaskMode::Mdi)
        );
        let idle = matches!(interp.interp_state, Some(crate::domain::InterpState::Idle));
        mode_runs && idle
    }

    pub fn motion(&self) -> EmcStatusMotion {
        self.inner.mirrors.motion.lock().unwrap().clone()
    }
    pub fn config(&self) -> EmcStatusConfig {
        self.inner.mirrors.config.lock().unwrap().clone()
    }
    pub fn io(&self) -> EmcStatusIo {
        self.inner.mirrors.io.lock().unwrap().clone()
    }
    pub fn task(&self) -> EmcStatusTask {
        self.inner.mirrors.task.lock().unwrap().clone()
    }
    pub fn interp(&self) -> EmcStatusInterp {
        self.inner.mirrors.interp.lock().unwrap().clone()
    }
}

impl Default for StatusClient {
    fn default() -> Self {
        Self::new()
    }
}

fn subscribe_all(socket: &zmq::Socket, inner: &Inner) {
    let mut subscribed = inner.subscribed.lock().unwrap();
    subscribed.clear();
    for channel in Channel::ALL {
        if socket::subscribe(socket, channel.topic()).is_ok() {
            subscribed.push(channel);
        }
    }
}

fn unsubscribe_topics(socket: &zmq::Socket, inner: &Inner) {
    let mut subscribed = inner.subscribed.lock().unwrap();
    for channel in subscribed.drain(..) {
        let _ = socket::unsubscribe(socket, channel.topic());
        // Defensive per-channel clear, restored from the original
        // application's per-topic-on-unsubscribe behavior; a no-op
        // duplicate when the terminal-disconnect clear already ran.
        inner.mirrors.clear(channel);
    }
}

/// Called from `stop()`, where no live socket remains to unsubscribe on;
/// just drops the recorded subscription set and applies the defensive
/// per-channel clear.
fn unsubscribe_all(inner: &Inner) {
    let mut subscribed = inner.subscribed.lock().unwrap();
    for channel in subscribed.drain(..) {
        inner.mirrors.clear(channel);
    }
}

fn run_worker(socket: zmq::Socket, inner: Arc<Inner>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        match socket::poll_readable(&socket, POLL_TIMEOUT) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                warn!(%err, "status: poll failed");
                continue;
            }
        }

        let topic = match socket.recv_bytes(0) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                warn!(%err, "status: topic frame recv failed");
                continue;
            }
        };
        let body = match socket.recv_bytes(0) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "status: body frame recv failed");
                continue;
            }
        };

        let mut container = match Container::decode(&body) {
            Ok(container) => container,
            Err(err) => {
                warn!(%err, "status: undecodable payload");
                continue;
            }
        };
        container.topic = Some(topic);

        if apply(&inner, &container) == Effect::Resubscribe {
            unsubscribe_topics(&socket, &inner);
            subscribe_all(&socket, &inner);
        }
    }
}
