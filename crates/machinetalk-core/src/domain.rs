//! Channel mirror types and command parameters.
//!
//! These stand in for the controller's real domain schema, which spec.md
//! treats as an external collaborator (supplied by a serialization layer we
//! don't own). Each mirror supports `merge_from` (overwrite only the fields
//! present in the incoming snapshot, leaving the rest intact) and `clear`.

use serde::{Deserialize, Serialize};

/// Six-axis pose used for teleop vectors and current/actual position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    Manual,
    Auto,
    Mdi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Estop,
    EstopReset,
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    Error,
    Done,
    WaitingForMotion,
    WaitingForMotionQueue,
    WaitingForIo,
    WaitingForMotionAndIo,
    WaitingForDelay,
    WaitingForSystemCmd,
    WaitingForSpindleOriented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpState {
    Idle,
    Reading,
    Paused,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajMode {
    Free,
    Coord,
    Teleop,
}

/// Tool offset data, as populated by `set_tool_offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolData {
    pub index: i32,
    pub zoffset: f64,
    pub xoffset: f64,
    pub diameter: f64,
    pub frontangle: f64,
    pub backangle: f64,
    pub orientation: i32,
}

/// A field-by-field merge that leaves unspecified fields intact.
///
/// "Unspecified" means `None` in the incoming snapshot. `Clear` resets the
/// mirror to its default (all fields unknown).
pub trait MergeFrom {
    fn merge_from(&mut self, other: &Self);
    fn clear(&mut self);
}

macro_rules! channel_mirror {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $(pub $field: Option<$ty>,)*
        }

        impl MergeFrom for $name {
            fn merge_from(&mut self, other: &Self) {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field.clone();
                    }
                )*
            }

            fn clear(&mut self) {
                *self = Self::default();
            }
        }
    };
}

channel_mirror!(EmcStatusMotion {
    current_position: Pose,
    actual_position: Pose,
    feedrate: f64,
    feed_override_enabled: bool,
    spindle_override_enabled: bool,
});

channel_mirror!(EmcStatusConfig {
    axes: u32,
    linear_units: f64,
    angular_units: f64,
    max_velocity: f64,
});

channel_mirror!(EmcStatusIo {
    tool_in_spindle: u32,
    pocket_prepped: i32,
    flood_enabled: bool,
    mist_enabled: bool,
});

channel_mirror!(EmcStatusTask {
    task_mode: TaskMode,
    task_state: TaskState,
    exec_state: ExecState,
    file: String,
});

channel_mirror!(EmcStatusInterp {
    interp_state: InterpState,
    line: i32,
});

/// Outbound command parameter block. A single reusable struct carries the
/// union of fields any command operation in the surface (see `command.rs`)
/// may populate; only the fields a given operation needs are set before
/// send, and the whole container is cleared again right after.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    pub line_number: Option<i32>,
    pub task_mode: Option<TaskMode>,
    pub task_state: Option<TaskState>,
    pub path: Option<String>,
    pub command: Option<String>,
    pub velocity: Option<f64>,
    pub scale: Option<f64>,
    pub enable: Option<bool>,
    pub index: Option<i32>,
    pub value: Option<f64>,
    pub distance: Option<f64>,
    pub debug_level: Option<i32>,
    pub traj_mode: Option<TrajMode>,
    pub pose: Option<Pose>,
    pub tool_data: Option<ToolData>,
}

/// Protocol-level parameters carried on status/error `PING`/full-update
/// frames. Currently just the keepalive interval the peer advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolParams {
    pub keepalive_timer: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_from_overwrites_only_present_fields() {
        let mut mirror = EmcStatusTask::default();
        mirror.merge_from(&EmcStatusTask {
            task_mode: Some(TaskMode::Auto),
            task_state: None,
            exec_state: None,
            file: Some("part.ngc".to_string()),
        });
        assert_eq!(mirror.task_mode, Some(TaskMode::Auto));
        assert_eq!(mirror.file.as_deref(), Some("part.ngc"));
        assert_eq!(mirror.task_state, None);

        // A second merge with only task_state set must leave task_mode/file intact.
        mirror.merge_from(&EmcStatusTask {
            task_mode: None,
            task_state: Some(TaskState::On),
            exec_state: None,
            file: None,
        });
        assert_eq!(mirror.task_mode, Some(TaskMode::Auto));
        assert_eq!(mirror.task_state, Some(TaskState::On));
        assert_eq!(mirror.file.as_deref(), Some("part.ngc"));
    }

    #[test]
    fn clear_resets_to_default() {
        let mut mirror = EmcStatusInterp {
            interp_state: Some(InterpState::Idle),
            line: Some(42),
        };
        mirror.clear();
        assert_eq!(mirror, EmcStatusInterp::default());
    }
}
