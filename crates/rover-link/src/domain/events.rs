//! Events published by the client and the connection state machine.
//!
//! Every [`ClientEvent`] variant has a stable name (see
//! [`ClientEvent::name`]) under which it is published on the
//! [`EventHub`](rover_core::EventHub).  Subscribers pick the names they care
//! about:
//!
//! | Name            | Variant                     |
//! |-----------------|-----------------------------|
//! | `state-changed` | [`ClientEvent::StateChanged`] |
//! | `open`          | [`ClientEvent::Open`]       |
//! | `close`         | [`ClientEvent::Close`]      |
//! | `channel-open`  | [`ClientEvent::ChannelOpen`] |
//! | `channel-close` | [`ClientEvent::ChannelClose`] |
//! | `state`         | [`ClientEvent::State`]      |
//! | `heartbeat`     | [`ClientEvent::Heartbeat`]  |
//! | `notify`        | [`ClientEvent::Notify`]     |
//! | `reconnecting`  | [`ClientEvent::Reconnecting`] |
//! | `error`         | [`ClientEvent::Error`]      |

use std::fmt;
use std::time::Duration;

use rover_core::{HeartbeatMessage, NamedEvent, StateSnapshot};
use serde_json::Value;

pub const EVENT_STATE_CHANGED: &str = "state-changed";
pub const EVENT_OPEN: &str = "open";
pub const EVENT_CLOSE: &str = "close";
pub const EVENT_CHANNEL_OPEN: &str = "channel-open";
pub const EVENT_CHANNEL_CLOSE: &str = "channel-close";
pub const EVENT_STATE: &str = "state";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_NOTIFY: &str = "notify";
pub const EVENT_RECONNECTING: &str = "reconnecting";
pub const EVENT_ERROR: &str = "error";

/// Lifecycle of the single logical session.
///
/// ```text
/// Idle ─► Connecting ─► Connected ─► Reconnecting ─► Connecting ─► …
///              │             │
///              ├─► Error     ├─► Timeout
///              └─► Timeout   └─► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No loop running: never started, or the retry budget is exhausted.
    Idle,
    Connecting,
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// The last attempt failed during the handshake.
    Error,
    /// The last attempt or session timed out.
    Timeout,
    /// Shut down on request; no further attempts.
    Stopped,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
            ConnectionState::Timeout => "timeout",
            ConnectionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two managed logical channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Outbound control commands.
    Ctrl,
    /// Inbound vehicle telemetry.
    State,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Ctrl => f.write_str("ctrl"),
            ChannelKind::State => f.write_str("state"),
        }
    }
}

/// Everything the client tells its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// The handshake completed and the session is usable.
    Open,
    /// The session ended.
    Close { reason: String },
    ChannelOpen { kind: ChannelKind, label: String },
    ChannelClose { kind: ChannelKind, label: String },
    /// A sequence-accepted vehicle state sample.
    State(StateSnapshot),
    Heartbeat(HeartbeatMessage),
    /// A session-level notification from the signaling peer.
    Notify(Value),
    /// A retry is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    Error(String),
}

impl ClientEvent {
    /// Name under which the event is published.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StateChanged(_) => EVENT_STATE_CHANGED,
            ClientEvent::Open => EVENT_OPEN,
            ClientEvent::Close { .. } => EVENT_CLOSE,
            ClientEvent::ChannelOpen { .. } => EVENT_CHANNEL_OPEN,
            ClientEvent::ChannelClose { .. } => EVENT_CHANNEL_CLOSE,
            ClientEvent::State(_) => EVENT_STATE,
            ClientEvent::Heartbeat(_) => EVENT_HEARTBEAT,
            ClientEvent::Notify(_) => EVENT_NOTIFY,
            ClientEvent::Reconnecting { .. } => EVENT_RECONNECTING,
            ClientEvent::Error(_) => EVENT_ERROR,
        }
    }
}

impl NamedEvent for ClientEvent {
    fn event_name(&self) -> &'static str {
        self.name()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
