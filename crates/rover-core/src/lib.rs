//! # rover-core
//!
//! Shared library for Rover-Link containing the data-channel wire protocol,
//! the delay buffer, and the playback engine that turns a jittery telemetry
//! stream into a smooth signal.
//!
//! This crate has no dependency on async runtimes, sockets, or timers.  Every
//! time-dependent operation takes the current local time (milliseconds on a
//! monotonic clock) as a parameter, which keeps it deterministic under test.
//!
//! # Architecture overview
//!
//! A remote vehicle publishes its state over an unreliable data channel at a
//! higher rate than the operator sends control commands.  Packets arrive late,
//! out of order, duplicated, or not at all.  This crate holds the logic that
//! copes with that:
//!
//! - **`protocol`** – JSON wire types, the parse-and-classify step for
//!   inbound payloads, the control encoder, and 31-bit sequence arithmetic.
//!
//! - **`domain`** – Clock-offset estimation, the time-ordered delay buffer,
//!   interpolation/extrapolation math, and the [`PlaybackEngine`] that ties
//!   them together on every render tick.
//!
//! - **`dispatch`** – A named publish/subscribe hub that isolates subscriber
//!   failures from each other and from the publisher.

pub mod dispatch;
pub mod domain;
pub mod protocol;

pub use dispatch::{EventHub, NamedEvent, SubscriptionId};
pub use domain::playback::{
    FrameFlags, FrameMeta, HeartbeatRecord, PlaybackConfig, PlaybackEngine, PlaybackFrame,
    PlaybackState, ReceiverStatus, RenderedFrame, TickOutput,
};
pub use protocol::codec::{decode_inbound, encode_control, ProtocolError};
pub use protocol::messages::{
    ControlCommand, HeartbeatMessage, InboundMessage, Payload, Pose, StateSnapshot, Velocity,
};
pub use protocol::sequence::{seq_ahead, OutboundSequence, SEQ_MODULUS};
