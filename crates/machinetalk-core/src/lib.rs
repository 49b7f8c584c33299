//! machinetalk-core: client-side connection state machine and
//! stream-replication protocol for a remote machine-control supervisor.
//!
//! Three peer endpoints share a common vocabulary ([`state`]) and
//! keepalive mechanism ([`keepalive`]) but differ in transport pattern:
//!
//! - [`status::StatusClient`] — subscribe-and-merge replica of five
//!   controller status channels.
//! - [`command::CommandClient`] — fire-and-forget command dispatch over
//!   a request/reply dealer socket, with heartbeat liveness tracking.
//! - [`error_client::ErrorClient`] — subscribe-and-buffer delivery of
//!   asynchronous notifications.
//!
//! Wire decoding and business dispatch are kept in separate functions
//! in each endpoint module so the latter can be unit-tested without a
//! live ZeroMQ peer.

pub mod command;
pub mod domain;
pub mod error_client;
pub mod keepalive;
pub mod message;
pub mod socket;
pub mod state;
pub mod status;

pub use command::{BrakeMode, CommandClient, JogKind, SpindleMode};
pub use domain::{
    CommandParams, EmcStatusConfig, EmcStatusInterp, EmcStatusIo, EmcStatusMotion, EmcStatusTask,
    ExecState, InterpState, MergeFrom, Pose, ProtocolParams, TaskMode, TaskState, ToolData,
    TrajMode,
};
pub use error_client::{Entry, ErrorClient};
pub use message::{Container, MessageType};
pub use state::{ConnectionState, SocketState};
pub use status::{Channel, StatusClient};
