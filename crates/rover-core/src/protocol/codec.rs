//! JSON codec for data-channel payloads.
//!
//! Inbound path:
//! ```text
//! Payload (text | bytes) → UTF-8 → JSON → alias normalization → InboundMessage
//! ```
//! Outbound path:
//! ```text
//! ControlCommand → alias normalization → default type → stamp seq/sent_at_ms → UTF-8 bytes
//! ```
//!
//! Legacy field names (`t` for `type`, `v` for `command`) are folded into the
//! canonical names here and nowhere else.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::messages::{
    ControlCommand, ControlMessage, InboundMessage, Payload, TYPE_COMMAND, TYPE_CTRL,
    TYPE_HEARTBEAT, TYPE_STATE,
};

/// Errors that can occur while decoding or encoding a payload.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// A binary payload was not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The text could not be parsed as JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The JSON declared a known type but its fields did not fit that type.
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// The control message could not be serialized.
    #[error("failed to serialize control message: {0}")]
    Serialize(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes and classifies one inbound payload.
///
/// JSON that is not an object, or an object without a recognized `type`, is
/// returned as [`InboundMessage::Unknown`] rather than an error; callers drop
/// it without logging a warning.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] or [`ProtocolError::InvalidJson`]
/// for undecodable payloads, and [`ProtocolError::Malformed`] when a known
/// type carries fields of the wrong shape (e.g. a state without `seq`).
///
/// # Examples
///
/// ```rust
/// use rover_core::protocol::{decode_inbound, InboundMessage, Payload};
///
/// let msg = decode_inbound(&Payload::from(r#"{"t":"STATE","seq":1}"#)).unwrap();
/// assert!(matches!(msg, InboundMessage::State(s) if s.seq == 1));
/// ```
pub fn decode_inbound(payload: &Payload) -> Result<InboundMessage, ProtocolError> {
    let text = match payload {
        Payload::Text(text) => text.as_str(),
        Payload::Binary(bytes) => {
            std::str::from_utf8(bytes).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?
        }
    };
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    classify(value)
}

/// Classifies an already-parsed JSON value.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] when a recognized type fails to
/// deserialize into its typed form.
pub fn classify(value: Value) -> Result<InboundMessage, ProtocolError> {
    let Value::Object(mut fields) = value else {
        return Ok(InboundMessage::Unknown(None));
    };
    normalize_aliases(&mut fields);

    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);

    match kind.as_deref() {
        Some(TYPE_HEARTBEAT) => serde_json::from_value(Value::Object(fields))
            .map(InboundMessage::Heartbeat)
            .map_err(|e| malformed("heartbeat", e)),
        Some(TYPE_STATE) => serde_json::from_value(Value::Object(fields))
            .map(InboundMessage::State)
            .map_err(|e| malformed("state", e)),
        Some(TYPE_COMMAND) | Some(TYPE_CTRL) => serde_json::from_value(Value::Object(fields))
            .map(InboundMessage::Control)
            .map_err(|e| malformed("control", e)),
        _ => Ok(InboundMessage::Unknown(kind)),
    }
}

/// Encodes a control payload with the given sequence number and send time.
///
/// A bare command becomes `{"type":"cmd","command":<value>}`.  A structured
/// payload keeps its fields; `v` is renamed to `command`, a string `t` to
/// `type`, and a missing `type` defaults to `"cmd"`.  Any caller-supplied
/// `seq` or `sent_at_ms` is overwritten.
///
/// # Errors
///
/// Returns [`ProtocolError::Serialize`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use rover_core::protocol::encode_control;
///
/// let bytes = encode_control("UP".into(), 1, 1000).unwrap();
/// let text = String::from_utf8(bytes).unwrap();
/// assert_eq!(text, r#"{"type":"cmd","command":"UP","seq":1,"sent_at_ms":1000}"#);
/// ```
pub fn encode_control(
    command: ControlCommand,
    seq: u32,
    sent_at_ms: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let mut fields = match command {
        ControlCommand::Bare(value) => {
            let mut fields = Map::new();
            fields.insert("command".to_string(), value);
            fields
        }
        ControlCommand::Structured(fields) => fields,
    };
    normalize_aliases(&mut fields);

    let kind = match fields.remove("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        _ => TYPE_COMMAND.to_string(),
    };
    let command = fields.remove("command");
    fields.remove("seq");
    fields.remove("sent_at_ms");

    let message = ControlMessage {
        kind,
        command,
        seq,
        sent_at_ms,
        extra: fields,
    };
    serde_json::to_vec(&message).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Used for the `sent_at_ms` stamp on outbound messages.
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Internals ─────────────────────────────────────────────────────────────────

/// Folds legacy field names into canonical ones.
///
/// `t` only counts as a type when it is a string; some peers use a numeric
/// `t` as a timestamp.
fn normalize_aliases(fields: &mut Map<String, Value>) {
    let has_type = matches!(fields.get("type"), Some(Value::String(s)) if !s.is_empty());
    if !has_type && matches!(fields.get("t"), Some(Value::String(_))) {
        if let Some(kind) = fields.remove("t") {
            fields.insert("type".to_string(), kind);
        }
    }
    if !fields.contains_key("command") {
        if let Some(command) = fields.remove("v") {
            fields.insert("command".to_string(), command);
        }
    }
}

fn malformed(kind: &'static str, err: serde_json::Error) -> ProtocolError {
    ProtocolError::Malformed {
        kind,
        reason: err.to_string(),
    }
}
