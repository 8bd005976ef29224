//! Playback engine: the synchronous core of the state receiver.
//!
//! # How a tick works
//!
//! ```text
//!  now ──► target = now - delay_ms
//!                │
//!      ┌─────────┴─────────────────────────────────────┐
//!      │ bracket(target) → (previous, next)            │
//!      ├───────────────────────────────────────────────┤
//!      │ no previous          → clone next             │
//!      │ no next              → extrapolate newest     │
//!      │ same timestamp       → clone next             │
//!      │ otherwise            → interpolate            │
//!      └───────────────────────────────────────────────┘
//!                │
//!                ▼
//!   TickOutput { frame, status (rate-limited) }
//! ```
//!
//! Rendering 80 ms behind the live stream means almost every tick lands
//! between two real samples.  When the stream stalls, the newest sample is
//! projected forward for at most `max_extrapolation_ms`.
//!
//! The engine owns no timers.  The async driver calls [`PlaybackEngine::tick`]
//! at a fixed cadence and passes the current monotonic time.

use tracing::trace;

use crate::domain::clock::ClockSync;
use crate::domain::delay_buffer::{BufferedEntry, DelayBuffer, InsertOutcome};
use crate::domain::motion::{extrapolate, interpolate};
pub use crate::domain::motion::PlaybackFrame;
use crate::protocol::messages::{HeartbeatMessage, StateSnapshot};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tuning knobs for playback.  All durations are milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// How far behind "now" frames are rendered.
    pub delay_ms: f64,
    /// Trailing window kept in the delay buffer.
    pub history_ms: f64,
    /// Longest forward projection past the newest sample.
    pub max_extrapolation_ms: f64,
    /// Minimum spacing between two status updates.
    pub status_interval_ms: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            delay_ms: 80.0,
            history_ms: 2000.0,
            max_extrapolation_ms: 150.0,
            status_interval_ms: 200.0,
        }
    }
}

// ── Output types ──────────────────────────────────────────────────────────────

/// How a frame was resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    /// `true` when the frame was projected past the newest sample.
    pub extrapolated: bool,
}

/// Metadata about the last frame produced, carried in status updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMeta {
    /// `seq` of the raw snapshot the frame was built from.
    pub seq: u32,
    /// Local time the frame represents.
    pub target_ms: f64,
    /// Local time of the raw snapshot.
    pub sample_ms: f64,
    pub extrapolated: bool,
}

/// Whether the engine produced a frame on the tick that emitted a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No consumer is registered or there is nothing buffered.
    Idle,
    Playing,
}

/// Liveness summary for HUD-style consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverStatus {
    pub state: PlaybackState,
    pub buffer_len: usize,
    /// Derived heartbeat age; `None` when nothing has been received yet.
    pub hb_age_ms: Option<f64>,
    pub last_frame: Option<FrameMeta>,
    /// `local - remote` clock offset, once known.
    pub clock_offset_ms: Option<f64>,
}

/// One smoothed frame plus the raw snapshot it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame {
    pub frame: PlaybackFrame,
    pub raw: StateSnapshot,
    pub flags: FrameFlags,
}

/// Everything one tick produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub frame: Option<RenderedFrame>,
    pub status: Option<ReceiverStatus>,
}

/// Last heartbeat seen on the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatRecord {
    pub hb_age_ms: Option<f64>,
    pub label: String,
    pub received_at_ms: f64,
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Delay buffer, clock offset, and frame resolution in one owned struct.
#[derive(Debug, Clone)]
pub struct PlaybackEngine {
    config: PlaybackConfig,
    clock: ClockSync,
    buffer: DelayBuffer,
    heartbeat: Option<HeartbeatRecord>,
    last_message_at_ms: Option<f64>,
    last_frame: Option<FrameMeta>,
    last_status_at_ms: Option<f64>,
}

impl PlaybackEngine {
    pub fn new(config: PlaybackConfig) -> Self {
        let buffer = DelayBuffer::new(config.history_ms);
        Self {
            config,
            clock: ClockSync::new(),
            buffer,
            heartbeat: None,
            last_message_at_ms: None,
            last_frame: None,
            last_status_at_ms: None,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Buffers an already sequence-accepted snapshot received at `now_ms`.
    ///
    /// Returns `true` if the snapshot was inserted.
    pub fn ingest_state(&mut self, snapshot: StateSnapshot, now_ms: f64) -> bool {
        self.last_message_at_ms = Some(now_ms);
        let local_time_ms = self.clock.map(snapshot.sent_at_ms, now_ms);
        let seq = snapshot.seq;
        let outcome = self.buffer.insert(
            BufferedEntry {
                local_time_ms,
                snapshot,
            },
            now_ms,
        );
        if outcome != InsertOutcome::Inserted {
            trace!(seq, ?outcome, "snapshot not buffered");
        }
        outcome == InsertOutcome::Inserted
    }

    /// Records a heartbeat received at `now_ms`.
    pub fn ingest_heartbeat(&mut self, heartbeat: &HeartbeatMessage, now_ms: f64) {
        self.last_message_at_ms = Some(now_ms);
        self.heartbeat = Some(HeartbeatRecord {
            hb_age_ms: heartbeat.hb_age_ms,
            label: heartbeat.label.clone(),
            received_at_ms: now_ms,
        });
    }

    /// Heartbeat age: the explicit age from the last heartbeat if it carried
    /// one, else time since the last message of any kind, else `None`.
    pub fn heartbeat_age_ms(&self, now_ms: f64) -> Option<f64> {
        if let Some(age) = self.heartbeat.as_ref().and_then(|hb| hb.hb_age_ms) {
            return Some(age);
        }
        self.last_message_at_ms.map(|at| now_ms - at)
    }

    pub fn last_heartbeat(&self) -> Option<&HeartbeatRecord> {
        self.heartbeat.as_ref()
    }

    pub fn clock_offset_ms(&self) -> Option<f64> {
        self.clock.offset_ms()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drops every buffered snapshot.  The clock offset is kept.
    pub fn reset_buffer(&mut self) {
        self.buffer.clear();
        self.last_frame = None;
    }

    /// Runs one playback step at `now_ms`.
    ///
    /// Without a consumer, or with an empty buffer, no frame is produced and
    /// the (rate-limited) status reports [`PlaybackState::Idle`].
    pub fn tick(&mut self, now_ms: f64, has_consumer: bool) -> TickOutput {
        self.buffer.prune(now_ms);

        if !has_consumer || self.buffer.is_empty() {
            return TickOutput {
                frame: None,
                status: self.status_if_due(now_ms, PlaybackState::Idle),
            };
        }

        let target_ms = now_ms - self.config.delay_ms;
        let frame = self.resolve(target_ms);
        if let Some(rendered) = &frame {
            trace!(
                seq = rendered.raw.seq,
                extrapolated = rendered.flags.extrapolated,
                "frame resolved"
            );
        }
        let state = if frame.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        };
        TickOutput {
            frame,
            status: self.status_if_due(now_ms, state),
        }
    }

    fn resolve(&mut self, target_ms: f64) -> Option<RenderedFrame> {
        let (previous, next) = self.buffer.bracket(target_ms);
        let (frame, source, flags) = match (previous, next) {
            (None, None) => return None,
            (None, Some(next)) => (frame_of(next), next, FrameFlags::default()),
            (Some(previous), None) => {
                let dt = target_ms - previous.local_time_ms;
                let frame = extrapolate(
                    &frame_of(previous),
                    dt,
                    self.config.max_extrapolation_ms,
                );
                (frame, previous, FrameFlags { extrapolated: true })
            }
            (Some(previous), Some(next)) if next.local_time_ms == previous.local_time_ms => {
                (frame_of(next), next, FrameFlags::default())
            }
            (Some(previous), Some(next)) => {
                let span = next.local_time_ms - previous.local_time_ms;
                let t = ((target_ms - previous.local_time_ms) / span).clamp(0.0, 1.0);
                (
                    interpolate(&frame_of(previous), &frame_of(next), t),
                    next,
                    FrameFlags::default(),
                )
            }
        };

        self.last_frame = Some(FrameMeta {
            seq: source.snapshot.seq,
            target_ms,
            sample_ms: source.local_time_ms,
            extrapolated: flags.extrapolated,
        });
        Some(RenderedFrame {
            frame,
            raw: source.snapshot.clone(),
            flags,
        })
    }

    fn status_if_due(&mut self, now_ms: f64, state: PlaybackState) -> Option<ReceiverStatus> {
        if let Some(last) = self.last_status_at_ms {
            if now_ms - last < self.config.status_interval_ms {
                return None;
            }
        }
        self.last_status_at_ms = Some(now_ms);
        Some(ReceiverStatus {
            state,
            buffer_len: self.buffer.len(),
            hb_age_ms: self.heartbeat_age_ms(now_ms),
            last_frame: self.last_frame,
            clock_offset_ms: self.clock.offset_ms(),
        })
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new(PlaybackConfig::default())
    }
}

fn frame_of(entry: &BufferedEntry) -> PlaybackFrame {
    PlaybackFrame::new(entry.snapshot.pose, entry.snapshot.velocity)
}
