//! Domain module: clock reconciliation, the delay buffer, motion math, and
//! the playback engine.

pub mod clock;
pub mod delay_buffer;
pub mod motion;
pub mod playback;

pub use clock::ClockSync;
pub use delay_buffer::{BufferedEntry, DelayBuffer, InsertOutcome};
pub use motion::{extrapolate, interpolate, lerp_angle, wrap_angle};
pub use playback::{
    FrameFlags, FrameMeta, HeartbeatRecord, PlaybackConfig, PlaybackEngine, PlaybackFrame,
    PlaybackState, ReceiverStatus, RenderedFrame, TickOutput,
};
