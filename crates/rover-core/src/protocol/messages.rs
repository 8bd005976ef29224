//! Wire types for the JSON data-channel protocol.
//!
//! Two logical channels carry JSON text:
//!
//! ```text
//! operator → vehicle  (ctrl)   {"type":"cmd","command":"UP","seq":7,"sent_at_ms":1700000000123}
//! vehicle  → operator (state)  {"type":"state","seq":99,"sent_at_ms":...,"pose":{...},"velocity":{...}}
//!                              {"type":"hb","label":"#state","hb_age_ms":12.5}
//! ```
//!
//! Older peers use `t` instead of `type` and `v` instead of `command`.  Those
//! aliases are folded into the canonical names exactly once, inside
//! [`crate::protocol::codec`]; nothing downstream ever looks at them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `type` value of a vehicle state message (compared case-insensitively).
pub const TYPE_STATE: &str = "state";
/// `type` value of a heartbeat message.
pub const TYPE_HEARTBEAT: &str = "hb";
/// Default `type` of an outbound control payload.
pub const TYPE_COMMAND: &str = "cmd";
/// Alternate `type` some peers use for control payloads.
pub const TYPE_CTRL: &str = "ctrl";

// ── Raw payloads ──────────────────────────────────────────────────────────────

/// A raw message as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A text frame.
    Text(String),
    /// A binary frame; expected to hold UTF-8 JSON.
    Binary(Vec<u8>),
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

// ── Vehicle state ─────────────────────────────────────────────────────────────

/// Planar vehicle pose.
///
/// `heading` is in radians.  The vehicle moves along `(sin(heading), cos(heading))`,
/// i.e. heading 0 points down the +y axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub heading: f64,
}

/// Vehicle velocity: forward speed (units/s) and yaw rate (rad/s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    #[serde(default)]
    pub linear: f64,
    #[serde(default)]
    pub angular: f64,
}

/// Health summary the vehicle attaches to each state message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Age of the last operator heartbeat as seen by the vehicle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hb_age_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctrl_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estop: Option<bool>,
}

/// Echo of the last control command the vehicle applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastControl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_recv_at_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

/// Simulation step information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt_sec: Option<f64>,
}

/// One vehicle state sample.  Immutable once buffered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// 31-bit wrapping sequence number assigned by the vehicle.
    pub seq: u32,
    /// Sender wall-clock time in milliseconds, if the sender stamped it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at_ms: Option<f64>,
    #[serde(default)]
    pub pose: Pose,
    #[serde(default)]
    pub velocity: Velocity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VehicleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ctrl: Option<LastControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepInfo>,
}

impl StateSnapshot {
    /// Creates a snapshot with only the fields playback needs.
    pub fn new(seq: u32, sent_at_ms: Option<f64>, pose: Pose, velocity: Velocity) -> Self {
        Self {
            seq,
            sent_at_ms,
            pose,
            velocity,
            status: None,
            last_ctrl: None,
            step: None,
        }
    }
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

/// Liveness ping from the vehicle side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Channel label the sender attached.
    #[serde(default)]
    pub label: String,
    /// Sender-measured heartbeat age, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hb_age_ms: Option<f64>,
}

// ── Control ───────────────────────────────────────────────────────────────────

/// A control payload as handed to the encoder.
///
/// Callers either send a bare command value (`"UP"`, `3`, `[0.5, 0.1]`) or a
/// structured object that may still use the legacy `v`/`t` field names.  A
/// JSON object is always treated as structured.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// A bare command value; becomes the `command` field.
    Bare(Value),
    /// A structured payload; its fields are sent as-is after normalization.
    Structured(Map<String, Value>),
}

impl From<&str> for ControlCommand {
    fn from(command: &str) -> Self {
        ControlCommand::Bare(Value::String(command.to_string()))
    }
}

impl From<String> for ControlCommand {
    fn from(command: String) -> Self {
        ControlCommand::Bare(Value::String(command))
    }
}

impl From<Map<String, Value>> for ControlCommand {
    fn from(fields: Map<String, Value>) -> Self {
        ControlCommand::Structured(fields)
    }
}

impl From<Value> for ControlCommand {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => ControlCommand::Structured(fields),
            other => ControlCommand::Bare(other),
        }
    }
}

/// A fully stamped control message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Value>,
    pub seq: u32,
    pub sent_at_ms: u64,
    /// Any additional caller-supplied fields, serialized alongside.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Classified inbound message ────────────────────────────────────────────────

/// Result of the single parse-and-classify step applied to inbound payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A control payload (only seen when a peer echoes or loops back commands).
    Control(ControlMessage),
    /// A vehicle state sample.
    State(StateSnapshot),
    /// A heartbeat.
    Heartbeat(HeartbeatMessage),
    /// Valid JSON without a recognized type; carries the declared type, if any.
    Unknown(Option<String>),
}

impl InboundMessage {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Control(_) => "control",
            InboundMessage::State(_) => "state",
            InboundMessage::Heartbeat(_) => "heartbeat",
            InboundMessage::Unknown(_) => "unknown",
        }
    }
}
