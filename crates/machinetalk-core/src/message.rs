//! The message container shared across all three endpoints.
//!
//! A single `Container` shape is reused for every wire message: a type
//! discriminator plus a grab-bag of optional sub-payloads. This mirrors the
//! protobuf `Container` the original controller bridge exchanges (see
//! spec.md §3) without committing this crate to protobuf specifically — the
//! real domain schema is out of scope, so we decode with `serde_json`, the
//! same approach `hooteproto`'s JSON content-type path uses for its
//! `Message<T>` envelopes.

use serde::{Deserialize, Serialize};

use crate::domain::{
    CommandParams, EmcStatusConfig, EmcStatusInterp, EmcStatusIo, EmcStatusMotion, EmcStatusTask,
    ProtocolParams,
};

/// Closed set of message-type discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Ping,
    PingAcknowledge,
    EmcstatFullUpdate,
    EmcstatIncrementalUpdate,

    NmlError,
    NmlText,
    NmlDisplay,
    OperatorError,
    OperatorText,
    OperatorDisplay,

    TaskAbort,
    TaskPlanRun,
    TaskPlanPause,
    TaskPlanStep,
    TaskResume,
    TaskPlanInit,
    TaskSetMode,
    TaskSetState,
    TaskPlanOpen,
    TaskPlanExecute,
    TaskPlanSetBlockDelete,
    TaskPlanSetOptionalStop,

    SpindleBrakeEngage,
    SpindleBrakeRelease,
    SpindleOn,
    SpindleOff,
    SpindleIncrease,
    SpindleDecrease,
    SpindleConstant,

    TrajSetSpindleScale,
    TrajSetScale,
    TrajSetFoEnable,
    TrajSetSoEnable,
    TrajSetFhEnable,
    TrajSetMaxVelocity,
    TrajSetMode,
    TrajSetTeleopEnable,
    TrajSetTeleopVector,

    MotionAdaptive,
    MotionSetAout,
    MotionSetDout,

    CoolantFloodOn,
    CoolantFloodOff,
    CoolantMistOn,
    CoolantMistOff,

    AxisHome,
    AxisUnhome,
    AxisOverrideLimits,
    AxisAbort,
    AxisJog,
    AxisIncrJog,
    AxisSetMinPositionLimit,
    AxisSetMaxPositionLimit,

    ToolLoadToolTable,
    ToolSetOffset,

    SetDebug,
    Shutdown,
}

/// The reusable, decode-target container. One instance per endpoint is
/// enough (per spec.md §3/§9); nothing here prevents decoding into a fresh
/// instance per message if a transport library prefers that instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    pub message_type: Option<MessageType>,
    /// The channel/topic the frame arrived on (subscribe endpoints only).
    /// Unused on the command dealer socket.
    pub topic: Option<String>,
    pub interp_name: Option<String>,
    pub notes: Vec<String>,

    pub emc_status_motion: Option<EmcStatusMotion>,
    pub emc_status_config: Option<EmcStatusConfig>,
    pub emc_status_io: Option<EmcStatusIo>,
    pub emc_status_task: Option<EmcStatusTask>,
    pub emc_status_interp: Option<EmcStatusInterp>,

    pub emc_command_params: Option<CommandParams>,
    pub pparams: Option<ProtocolParams>,
}

impl Container {
    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type
    }

    pub fn has_emc_status_motion(&self) -> bool {
        self.emc_status_motion.is_some()
    }
    pub fn has_emc_status_config(&self) -> bool {
        self.emc_status_config.is_some()
    }
    pub fn has_emc_status_io(&self) -> bool {
        self.emc_status_io.is_some()
    }
    pub fn has_emc_status_task(&self) -> bool {
        self.emc_status_task.is_some()
    }
    pub fn has_emc_status_interp(&self) -> bool {
        self.emc_status_interp.is_some()
    }
    pub fn has_pparams(&self) -> bool {
        self.pparams.is_some()
    }

    /// Decode a single wire frame's body into a container.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode this container to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        // A `Container` built by this crate always round-trips through serde_json.
        serde_json::to_vec(self).expect("Container serializes to JSON")
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut container = Container::default();
        container.message_type = Some(MessageType::EmcstatFullUpdate);
        container.notes.push("hello".to_string());
        container.pparams = Some(ProtocolParams {
            keepalive_timer: 1000,
        });

        let bytes = container.encode();
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(decoded.message_type(), Some(MessageType::EmcstatFullUpdate));
        assert!(decoded.has_pparams());
        assert_eq!(decoded.pparams.unwrap().keepalive_timer, 1000);
    }

    #[test]
    fn presence_queries_reflect_optional_fields() {
        let container = Container::default();
        assert!(!container.has_emc_status_motion());
        assert!(!container.has_pparams());
    }
}
