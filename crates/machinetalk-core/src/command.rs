//! CommandClient: fire-and-forget command dispatch over a DEALER socket,
//! with heartbeat-based liveness tracking.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use crate::domain::{CommandParams, Pose, TaskMode, TaskState, ToolData, TrajMode};
use crate::keepalive::Timer;
use crate::message::{Container, MessageType};
use crate::socket::{self, POLL_TIMEOUT};
use crate::state::{ConnectionState, ConnectionStateCell, SocketState, SocketStateCell};

pub const DEFAULT_HEARTBEAT_PERIOD_MS: u64 = 3000;
pub const DEFAULT_PING_ERROR_THRESHOLD: u32 = 2;

/// `jog()`'s requested motion kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogKind {
    Stop,
    Continuous,
    Increment,
}

/// `set_spindle()`'s requested direction/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpindleMode {
    Forward,
    Reverse,
    Off,
    Increase,
    Decrease,
    Constant,
}

/// `set_spindle_brake()`'s requested state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrakeMode {
    Engage,
    Release,
}

pub(crate) struct Inner {
    state: ConnectionStateCell,
    socket_state: SocketStateCell,
    tx: Mutex<Container>,
    ping_error_count: AtomicU32,
    ping_error_threshold: u32,
    heartbeat: Timer,
    pending_send: Mutex<Vec<Vec<u8>>>,
}

impl Inner {
    fn new(weak: Weak<Inner>, ping_error_threshold: u32) -> Self {
        let timer_weak = weak.clone();
        Inner {
            state: ConnectionStateCell::new(ConnectionState::Disconnected),
            socket_state: SocketStateCell::new(SocketState::Down),
            tx: Mutex::new(Container::default()),
            ping_error_count: AtomicU32::new(0),
            ping_error_threshold,
            heartbeat: Timer::spawn("command-heartbeat", move || {
                if let Some(inner) = timer_weak.upgrade() {
                    on_heartbeat_tick(&inner);
                }
            }),
            pending_send: Mutex::new(Vec::new()),
        }
    }
}

/// Builds and enqueues a `PING` frame; queued frames are drained by the
/// I/O worker on its next poll wake.
fn enqueue_ping(inner: &Inner) {
    let mut container = Container::default();
    container.message_type = Some(MessageType::Ping);
    let bytes = container.encode();
    inner.pending_send.lock().unwrap().push(bytes);
}

fn on_heartbeat_tick(inner: &Inner) {
    let count = inner.ping_error_count.fetch_add(1, Ordering::AcqRel) + 1;
    if count > inner.ping_error_threshold {
        warn!(count, "command: ping error threshold exceeded, declaring timeout");
        inner.socket_state.set(SocketState::Trying);
        inner.state.set(ConnectionState::Timeout);
    }
    enqueue_ping(inner);
}

pub(crate) fn apply(inner: &Inner, container: &Container) {
    match container.message_type() {
        Some(MessageType::PingAcknowledge) => {
            inner.ping_error_count.store(0, Ordering::Release);
            if inner.socket_state.get() != SocketState::Up {
                inner.socket_state.set(SocketState::Up);
                inner.state.set(ConnectionState::Connected);
                info!("command: connected");
            }
        }
        Some(MessageType::NmlError) | Some(MessageType::OperatorError) => {
            warn!("command: peer reported error");
        }
        Some(other) => {
            debug!(?other, "command: unrecognized message type");
        }
        None => {
            warn!("command: message with no type discriminator");
        }
    }
}

/// A fire-and-forget command sender with heartbeat-driven liveness.
pub struct CommandClient {
    inner: Arc<Inner>,
    uri: Mutex<Option<String>>,
    identity: String,
    heartbeat_period: Mutex<Duration>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl CommandClient {
    pub fn new() -> Self {
        Self::with_ping_error_threshold(DEFAULT_PING_ERROR_THRESHOLD)
    }

    pub fn with_ping_error_threshold(ping_error_threshold: u32) -> Self {
        CommandClient {
            inner: Arc::new_cyclic(|weak| Inner::new(weak.clone(), ping_error_threshold)),
            uri: Mutex::new(None),
            identity: socket::unique_identity(),
            heartbeat_period: Mutex::new(Duration::from_millis(DEFAULT_HEARTBEAT_PERIOD_MS)),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn set_command_uri(&self, uri: impl Into<String>) {
        *self.uri.lock().unwrap() = Some(uri.into());
    }

    /// Sets the heartbeat period; `0` disables the heartbeat entirely.
    pub fn set_heartbeat_period(&self, period: Duration) {
        *self.heartbeat_period.lock().unwrap() = period;
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn ready(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            Ok(())
        } else {
            self.start()
        }
    }

    /// Connects the dealer socket, arms the heartbeat (unless
    /// `heartbeat_period` is zero), sends the initial ping, and launches the
    /// I/O worker. Socket/thread construction failures are returned rather
    /// than panicking; calling this before [`Self::set_command_uri`] is a
    /// programmer error and panics.
    pub fn start(&self) -> anyhow::Result<()> {
        let uri = self
            .uri
            .lock()
            .unwrap()
            .clone()
            .expect("command_uri must be set before start()");

        self.inner.state.set(ConnectionState::Connecting);
        self.shutdown.store(false, Ordering::Release);

        let ctx = zmq::Context::new();
        let dealer = socket::create_dealer(&ctx, &uri, self.identity.as_bytes())?;

        let period = *self.heartbeat_period.lock().unwrap();
        if !period.is_zero() {
            self.inner.heartbeat.arm_periodic(period);
            enqueue_ping(&self.inner);
        }

        let inner = Arc::clone(&self.inner);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name("command-io".to_string())
            .spawn(move || run_worker(dealer, inner, shutdown))
            .context("spawn command I/O worker")?;

        *self.worker.lock().unwrap() = Some(handle);
        info!(identity = %self.identity, "command: started");
        Ok(())
    }

    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.heartbeat.cancel();
        self.inner.state.set(ConnectionState::Disconnected);
        self.started.store(false, Ordering::Release);
        info!("command: stopped");
    }

    pub fn connected(&self) -> bool {
        self.inner.state.get() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    fn send_simple(&self, message_type: MessageType, interp_name: Option<&str>) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(message_type);
        if let Some(name) = interp_name {
            tx.interp_name = Some(name.to_string());
        }
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn abort(&self, interp: &str) -> bool {
        self.send_simple(MessageType::TaskAbort, Some(interp))
    }

    pub fn run_program(&self, interp: &str, line: i32) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TaskPlanRun);
        tx.interp_name = Some(interp.to_string());
        tx.emc_command_params = Some(CommandParams {
            line_number: Some(line),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn pause_program(&self, interp: &str) -> bool {
        self.send_simple(MessageType::TaskPlanPause, Some(interp))
    }
    pub fn step_program(&self, interp: &str) -> bool {
        self.send_simple(MessageType::TaskPlanStep, Some(interp))
    }
    pub fn resume_program(&self, interp: &str) -> bool {
        self.send_simple(MessageType::TaskResume, Some(interp))
    }
    pub fn reset_program(&self, interp: &str) -> bool {
        self.send_simple(MessageType::TaskPlanInit, Some(interp))
    }

    pub fn set_task_mode(&self, interp: &str, mode: TaskMode) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TaskSetMode);
        tx.interp_name = Some(interp.to_string());
        tx.emc_command_params = Some(CommandParams {
            task_mode: Some(mode),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_task_state(&self, interp: &str, state: TaskState) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TaskSetState);
        tx.interp_name = Some(interp.to_string());
        tx.emc_command_params = Some(CommandParams {
            task_state: Some(state),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn open_program(&self, interp: &str, path: &str) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TaskPlanOpen);
        tx.interp_name = Some(interp.to_string());
        tx.emc_command_params = Some(CommandParams {
            path: Some(path.to_string()),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn execute_mdi(&self, interp: &str, command: &str) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TaskPlanExecute);
        tx.interp_name = Some(interp.to_string());
        tx.emc_command_params = Some(CommandParams {
            command: Some(command.to_string()),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_spindle_brake(&self, kind: BrakeMode) -> bool {
        let message_type = match kind {
            BrakeMode::Engage => MessageType::SpindleBrakeEngage,
            BrakeMode::Release => MessageType::SpindleBrakeRelease,
        };
        self.send_simple(message_type, None)
    }

    pub fn set_spindle(&self, mode: SpindleMode, velocity: f64) -> bool {
        if !self.connected() {
            return false;
        }
        let (message_type, velocity) = match mode {
            SpindleMode::Forward => (MessageType::SpindleOn, Some(velocity)),
            SpindleMode::Reverse => (MessageType::SpindleOn, Some(-velocity)),
            SpindleMode::Off => (MessageType::SpindleOff, None),
            SpindleMode::Increase => (MessageType::SpindleIncrease, None),
            SpindleMode::Decrease => (MessageType::SpindleDecrease, None),
            SpindleMode::Constant => (MessageType::SpindleConstant, None),
        };
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(message_type);
        if let Some(velocity) = velocity {
            tx.emc_command_params = Some(CommandParams {
                velocity: Some(velocity),
                ..Default::default()
            });
        }
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_spindle_override(&self, scale: f64) -> bool {
        self.send_scale(MessageType::TrajSetSpindleScale, scale)
    }

    pub fn set_feed_override(&self, scale: f64) -> bool {
        self.send_scale(MessageType::TrajSetScale, scale)
    }

    fn send_scale(&self, message_type: MessageType, scale: f64) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(message_type);
        tx.emc_command_params = Some(CommandParams {
            scale: Some(scale),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    fn send_enable(&self, message_type: MessageType, enable: bool) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(message_type);
        tx.emc_command_params = Some(CommandParams {
            enable: Some(enable),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_feed_override_enabled(&self, enable: bool) -> bool {
        self.send_enable(MessageType::TrajSetFoEnable, enable)
    }
    pub fn set_spindle_override_enabled(&self, enable: bool) -> bool {
        self.send_enable(MessageType::TrajSetSoEnable, enable)
    }
    pub fn set_feed_hold_enabled(&self, enable: bool) -> bool {
        self.send_enable(MessageType::TrajSetFhEnable, enable)
    }
    pub fn set_adaptive_feed_enabled(&self, enable: bool) -> bool {
        self.send_enable(MessageType::MotionAdaptive, enable)
    }
    pub fn set_block_delete_enabled(&self, enable: bool) -> bool {
        self.send_enable(MessageType::TaskPlanSetBlockDelete, enable)
    }
    pub fn set_optional_stop_enabled(&self, enable: bool) -> bool {
        self.send_enable(MessageType::TaskPlanSetOptionalStop, enable)
    }
    pub fn set_teleop_enabled(&self, enable: bool) -> bool {
        self.send_enable(MessageType::TrajSetTeleopEnable, enable)
    }

    pub fn set_flood_enabled(&self, enable: bool) -> bool {
        self.send_simple(
            if enable {
                MessageType::CoolantFloodOn
            } else {
                MessageType::CoolantFloodOff
            },
            None,
        )
    }
    pub fn set_mist_enabled(&self, enable: bool) -> bool {
        self.send_simple(
            if enable {
                MessageType::CoolantMistOn
            } else {
                MessageType::CoolantMistOff
            },
            None,
        )
    }

    pub fn home_axis(&self, index: i32) -> bool {
        self.send_index(MessageType::AxisHome, index)
    }
    pub fn unhome_axis(&self, index: i32) -> bool {
        self.send_index(MessageType::AxisUnhome, index)
    }
    pub fn override_limits(&self) -> bool {
        self.send_simple(MessageType::AxisOverrideLimits, None)
    }

    fn send_index(&self, message_type: MessageType, index: i32) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(message_type);
        tx.emc_command_params = Some(CommandParams {
            index: Some(index),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    /// Jogs `axis` per `kind`; `kind = Stop` aborts jogging on that axis.
    /// An unrecognized kind has no representation in [`JogKind`], so
    /// callers cannot construct an invalid request — the tx container
    /// stays untouched until a valid kind is supplied.
    pub fn jog(&self, kind: JogKind, axis: i32, velocity: f64, distance: f64) -> bool {
        if !self.connected() {
            return false;
        }
        let (message_type, params) = match kind {
            JogKind::Stop => (
                MessageType::AxisAbort,
                CommandParams {
                    index: Some(axis),
                    ..Default::default()
                },
            ),
            JogKind::Continuous => (
                MessageType::AxisJog,
                CommandParams {
                    index: Some(axis),
                    velocity: Some(velocity),
                    ..Default::default()
                },
            ),
            JogKind::Increment => (
                MessageType::AxisIncrJog,
                CommandParams {
                    index: Some(axis),
                    velocity: Some(velocity),
                    distance: Some(distance),
                    ..Default::default()
                },
            ),
        };
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(message_type);
        tx.emc_command_params = Some(params);
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_maximum_velocity(&self, velocity: f64) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TrajSetMaxVelocity);
        tx.emc_command_params = Some(CommandParams {
            velocity: Some(velocity),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_axis_min_position_limit(&self, index: i32, value: f64) -> bool {
        self.send_index_value(MessageType::AxisSetMinPositionLimit, index, value)
    }
    pub fn set_axis_max_position_limit(&self, index: i32, value: f64) -> bool {
        self.send_index_value(MessageType::AxisSetMaxPositionLimit, index, value)
    }

    fn send_index_value(&self, message_type: MessageType, index: i32, value: f64) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(message_type);
        tx.emc_command_params = Some(CommandParams {
            index: Some(index),
            value: Some(value),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn load_tool_table(&self) -> bool {
        self.send_simple(MessageType::ToolLoadToolTable, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_tool_offset(
        &self,
        index: i32,
        zoffset: f64,
        xoffset: f64,
        diameter: f64,
        frontangle: f64,
        backangle: f64,
        orientation: i32,
    ) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::ToolSetOffset);
        tx.emc_command_params = Some(CommandParams {
            tool_data: Some(ToolData {
                index,
                zoffset,
                xoffset,
                diameter,
                frontangle,
                backangle,
                orientation,
            }),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_analog_output(&self, index: i32, value: f64) -> bool {
        self.send_index_value(MessageType::MotionSetAout, index, value)
    }

    pub fn set_digital_output(&self, index: i32, enable: bool) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::MotionSetDout);
        tx.emc_command_params = Some(CommandParams {
            index: Some(index),
            enable: Some(enable),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_trajectory_mode(&self, mode: TrajMode) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TrajSetMode);
        tx.emc_command_params = Some(CommandParams {
            traj_mode: Some(mode),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_teleop_vector(&self, a: f64, b: f64, c: f64, u: f64, v: f64, w: f64) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::TrajSetTeleopVector);
        tx.emc_command_params = Some(CommandParams {
            pose: Some(Pose { a, b, c, u, v, w }),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn set_debug_level(&self, interp: &str, level: i32) -> bool {
        if !self.connected() {
            return false;
        }
        let mut tx = self.inner.tx.lock().unwrap();
        tx.message_type = Some(MessageType::SetDebug);
        tx.interp_name = Some(interp.to_string());
        tx.emc_command_params = Some(CommandParams {
            debug_level: Some(level),
            ..Default::default()
        });
        let bytes = tx.encode();
        self.inner.pending_send.lock().unwrap().push(bytes);
        tx.clear();
        true
    }

    pub fn shutdown(&self) -> bool {
        self.send_simple(MessageType::Shutdown, None)
    }
}

impl Default for CommandClient {
    fn default() -> Self {
        Self::new()
    }
}

fn run_worker(socket: zmq::Socket, inner: Arc<Inner>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        for frame in inner.pending_send.lock().unwrap().drain(..) {
            if let Err(err) = socket.send(frame, 0) {
                warn!(%err, "command: send failed");
            }
        }

        match socket::poll_readable(&socket, POLL_TIMEOUT) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                warn!(%err, "command: poll failed");
                continue;
            }
        }

        let body = match socket.recv_bytes(0) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "command: recv failed");
                continue;
            }
        };
        match Container::decode(&body) {
            Ok(container) => apply(&inner, &container),
            Err(err) => warn!(%err, "command: undecodable payload"),
        }
    }
}
