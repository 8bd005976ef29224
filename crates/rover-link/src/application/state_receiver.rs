//! `StateReceiver`: turns the jittery state stream into a smooth,
//! slightly delayed playback signal.
//!
//! # Overview (for beginners)
//!
//! The receiver listens on the client's event hub:
//!
//! - `state` events go into the [`PlaybackEngine`]'s delay buffer,
//! - `heartbeat` events update the liveness record,
//! - `open` events (a fresh session) clear the buffer.
//!
//! A ticker task calls [`PlaybackEngine::tick`] at `tick_hz` and hands the
//! results to two callbacks:
//!
//! ```text
//! hub ──state/heartbeat/open──► engine ◄──tick── ticker (tick_hz)
//!                                             │
//!                       on_state(RenderedFrame) + on_status(ReceiverStatus)
//! ```
//!
//! Frames are only produced while an `on_state` callback is registered.
//! Status updates are produced either way, at most once per
//! `status_interval_ms`.
//!
//! Local time is measured in milliseconds since the receiver was created,
//! on Tokio's clock, so tests can run with a paused clock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rover_core::{EventHub, PlaybackEngine, ReceiverStatus, RenderedFrame, SubscriptionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::domain::config::LinkConfig;
use crate::domain::events::{ClientEvent, EVENT_HEARTBEAT, EVENT_OPEN, EVENT_STATE};

type FrameCallback = Arc<dyn Fn(&RenderedFrame) + Send + Sync>;
type StatusCallback = Arc<dyn Fn(&ReceiverStatus) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_state: Option<FrameCallback>,
    on_status: Option<StatusCallback>,
}

struct Ticker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Event-hub subscriber plus render-cadence ticker around a [`PlaybackEngine`].
pub struct StateReceiver {
    engine: Arc<Mutex<PlaybackEngine>>,
    callbacks: Arc<Mutex<Callbacks>>,
    hub: EventHub<ClientEvent>,
    origin: Instant,
    tick_interval: Duration,
    subscriptions: Mutex<Vec<(&'static str, SubscriptionId)>>,
    ticker: Mutex<Option<Ticker>>,
}

fn elapsed_ms(origin: Instant) -> f64 {
    origin.elapsed().as_micros() as f64 / 1000.0
}

impl StateReceiver {
    /// Creates a receiver bound to `hub`.  Nothing happens until
    /// [`start`](Self::start).
    pub fn new(hub: EventHub<ClientEvent>, config: &LinkConfig) -> Self {
        Self {
            engine: Arc::new(Mutex::new(PlaybackEngine::new(
                config.playback.to_playback_config(),
            ))),
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            hub,
            origin: Instant::now(),
            tick_interval: config.playback.tick_interval(),
            subscriptions: Mutex::new(Vec::new()),
            ticker: Mutex::new(None),
        }
    }

    /// Registers the frame consumer, replacing any previous one.
    pub fn on_state<F>(&self, callback: F)
    where
        F: Fn(&RenderedFrame) + Send + Sync + 'static,
    {
        self.callbacks.lock().on_state = Some(Arc::new(callback));
    }

    /// Registers the status consumer, replacing any previous one.
    pub fn on_status<F>(&self, callback: F)
    where
        F: Fn(&ReceiverStatus) + Send + Sync + 'static,
    {
        self.callbacks.lock().on_status = Some(Arc::new(callback));
    }

    /// Removes the frame consumer; ticks then produce status only.
    pub fn clear_on_state(&self) {
        self.callbacks.lock().on_state = None;
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    pub fn buffer_len(&self) -> usize {
        self.engine.lock().buffer_len()
    }

    pub fn clock_offset_ms(&self) -> Option<f64> {
        self.engine.lock().clock_offset_ms()
    }

    pub fn heartbeat_age_ms(&self) -> Option<f64> {
        self.engine.lock().heartbeat_age_ms(elapsed_ms(self.origin))
    }

    /// Subscribes to the hub and spawns the ticker.  Returns `false` if
    /// already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return false;
        }

        let origin = self.origin;
        let mut subscriptions = self.subscriptions.lock();

        let engine = Arc::clone(&self.engine);
        let id = self.hub.subscribe(EVENT_STATE, move |event: &ClientEvent| {
            if let ClientEvent::State(snapshot) = event {
                engine.lock().ingest_state(snapshot.clone(), elapsed_ms(origin));
            }
        });
        subscriptions.push((EVENT_STATE, id));

        let engine = Arc::clone(&self.engine);
        let id = self.hub.subscribe(EVENT_HEARTBEAT, move |event: &ClientEvent| {
            if let ClientEvent::Heartbeat(heartbeat) = event {
                engine.lock().ingest_heartbeat(heartbeat, elapsed_ms(origin));
            }
        });
        subscriptions.push((EVENT_HEARTBEAT, id));

        let engine = Arc::clone(&self.engine);
        let id = self.hub.subscribe(EVENT_OPEN, move |_: &ClientEvent| {
            debug!("session opened; clearing playback buffer");
            engine.lock().reset_buffer();
        });
        subscriptions.push((EVENT_OPEN, id));

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_ticker(
            Arc::clone(&self.engine),
            Arc::clone(&self.callbacks),
            origin,
            self.tick_interval,
            stop_rx,
        ));
        *ticker = Some(Ticker { stop_tx, handle });
        debug!(interval_ms = self.tick_interval.as_millis() as u64, "state receiver started");
        true
    }

    /// Halts the ticker and detaches every hub subscription.
    pub fn stop(&self) {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.stop_tx.send_replace(true);
            drop(ticker.handle);
        }
        for (name, id) in self.subscriptions.lock().drain(..) {
            self.hub.unsubscribe(name, id);
        }
        debug!("state receiver stopped");
    }
}

impl Drop for StateReceiver {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

async fn run_ticker(
    engine: Arc<Mutex<PlaybackEngine>>,
    callbacks: Arc<Mutex<Callbacks>>,
    origin: Instant,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop_rx.changed() => break,
        }
        if *stop_rx.borrow() {
            break;
        }

        let (on_state, on_status) = {
            let cbs = callbacks.lock();
            (cbs.on_state.clone(), cbs.on_status.clone())
        };
        let output = engine
            .lock()
            .tick(elapsed_ms(origin), on_state.is_some());

        if let (Some(rendered), Some(callback)) = (&output.frame, &on_state) {
            if catch_unwind(AssertUnwindSafe(|| callback(rendered))).is_err() {
                error!("on_state callback panicked");
            }
        }
        if let (Some(status), Some(callback)) = (&output.status, &on_status) {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                error!("on_status callback panicked");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rover_core::{HeartbeatMessage, PlaybackState, Pose, StateSnapshot, Velocity};

    fn config(tick_hz: u32) -> LinkConfig {
        let mut config = LinkConfig::default();
        config.playback.tick_hz = tick_hz;
        config
    }

    fn snapshot(seq: u32, sent_at_ms: f64, x: f64) -> StateSnapshot {
        StateSnapshot::new(
            seq,
            Some(sent_at_ms),
            Pose {
                x,
                y: 0.0,
                heading: 0.0,
            },
            Velocity::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_interpolate_between_buffered_samples() {
        // Arrange – 10 ms ticks, 80 ms playout delay
        let hub = EventHub::new();
        let receiver = StateReceiver::new(hub.clone(), &config(100));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        receiver.on_state(move |f: &RenderedFrame| sink.lock().push(f.clone()));
        receiver.start();

        // Act – samples 100 ms apart moving from x=0 to x=1
        hub.emit(&ClientEvent::State(snapshot(1, 5_000.0, 0.0)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        hub.emit(&ClientEvent::State(snapshot(2, 5_100.0, 1.0)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Assert – the tick at 130 ms renders target 50 ms, halfway
        let frames = frames.lock().clone();
        assert!(!frames.is_empty());
        assert!(
            frames
                .iter()
                .any(|f| f.raw.seq == 2 && !f.flags.extrapolated && (f.frame.pose.x - 0.5).abs() < 1e-9),
            "{frames:?}"
        );
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_rate_limited_without_consumer() {
        // Arrange
        let hub = EventHub::new();
        let receiver = StateReceiver::new(hub, &config(100));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        receiver.on_status(move |s: &ReceiverStatus| sink.lock().push(s.clone()));

        // Act
        receiver.start();
        tokio::time::sleep(Duration::from_millis(1_005)).await;

        // Assert – one status per 200 ms, all idle
        let statuses = statuses.lock().clone();
        assert_eq!(statuses.len(), 6, "{statuses:?}");
        assert!(statuses.iter().all(|s| s.state == PlaybackState::Idle));
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_tick_rate_still_ticks() {
        // Arrange – an unvalidated rate far above what the ticker can run at
        let hub = EventHub::new();
        let receiver = StateReceiver::new(hub, &config(u32::MAX));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        receiver.on_status(move |s: &ReceiverStatus| sink.lock().push(s.clone()));

        // Act
        receiver.start();
        tokio::time::sleep(Duration::from_millis(450)).await;

        // Assert – status keeps flowing, so the ticker task is alive
        assert_eq!(statuses.lock().len(), 3);
        assert!(receiver.is_running());
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_event_clears_buffer_but_keeps_offset() {
        // Arrange
        let hub = EventHub::new();
        let receiver = StateReceiver::new(hub.clone(), &config(60));
        receiver.start();
        hub.emit(&ClientEvent::State(snapshot(1, 5_000.0, 0.0)));
        assert_eq!(receiver.buffer_len(), 1);

        // Act
        hub.emit(&ClientEvent::Open);

        // Assert
        assert_eq!(receiver.buffer_len(), 0);
        assert!(receiver.clock_offset_ms().is_some());
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_age_prefers_reported_value() {
        let hub = EventHub::new();
        let receiver = StateReceiver::new(hub.clone(), &config(60));
        receiver.start();
        assert_eq!(receiver.heartbeat_age_ms(), None);

        hub.emit(&ClientEvent::Heartbeat(HeartbeatMessage {
            label: "#state".into(),
            hb_age_ms: Some(42.0),
        }));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(receiver.heartbeat_age_ms(), Some(42.0));
        receiver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_detaches_subscriptions_and_ticker() {
        // Arrange
        let hub = EventHub::new();
        let receiver = StateReceiver::new(hub.clone(), &config(60));
        let ticks = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&ticks);
        receiver.on_status(move |_: &ReceiverStatus| *sink.lock() += 1);
        assert!(receiver.start());
        assert!(!receiver.start());
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Act
        receiver.stop();
        let after_stop = *ticks.lock();
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Assert
        assert_eq!(hub.subscriber_count(EVENT_STATE), 0);
        assert_eq!(hub.subscriber_count(EVENT_OPEN), 0);
        assert_eq!(*ticks.lock(), after_stop);
        assert!(!receiver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_does_not_stop_ticker() {
        let hub = EventHub::new();
        let receiver = StateReceiver::new(hub, &config(100));
        let statuses = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&statuses);
        receiver.on_status(move |_: &ReceiverStatus| {
            *sink.lock() += 1;
            panic!("hud exploded");
        });

        receiver.start();
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert!(*statuses.lock() >= 2);
        receiver.stop();
    }
}
