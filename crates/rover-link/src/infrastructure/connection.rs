//! Connection manager: the session lifecycle state machine.
//!
//! # Overview (for beginners)
//!
//! One background task owns the connection.  Each pass through its loop is
//! one *attempt*:
//!
//! ```text
//!        ┌────────────────────────────────────────────────────────────┐
//!        ▼                                                            │
//!  reset channels ─► open session ─► await Connected ─► Connected ───┤
//!                        │                 │             (until       │
//!                        │ error           │ timeout /    disconnect  │
//!                        ▼                 ▼ failure      or timeout) │
//!                      Error            Timeout / Error       │       │
//!                        └──────────┬──────┘                  │       │
//!                                   ▼                         ▼       │
//!                           attempt += 1          attempt = 1 (reset) │
//!                                   └──────► Reconnecting ────────────┘
//!                                           (sleep backoff[attempt-1])
//! ```
//!
//! The failure that uses up the last of `max_attempts` is not followed by a
//! `Reconnecting` announcement.  The loop keeps the failure state through
//! that final backoff wait, then publishes an error, moves to
//! [`ConnectionState::Idle`], and exits.  [`ConnectionManager::restart`]
//! spawns a fresh loop.
//!
//! [`ConnectionManager::stop`] raises a `watch` flag that every suspension
//! point in the loop (open, handshake, connected wait, backoff sleep) selects
//! on, and force-closes any live session.  The loop then exits without
//! scheduling another attempt.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rover_core::EventHub;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::config::{LinkConfig, ReconnectConfig};
use crate::domain::events::{ClientEvent, ConnectionState};
use crate::infrastructure::data_channel::DataChannelManager;
use crate::infrastructure::transport::{Session, SessionControl, SessionEvent, Transport};

/// `event_type` of the notify that carries the session's connection id.
const CONNECTION_CREATED: &str = "connection.created";

/// How one attempt ended.
#[derive(Debug, PartialEq)]
enum AttemptOutcome {
    /// Shutdown was requested; do not retry.
    Stopped,
    /// The attempt failed.  `connected` is true when the handshake had
    /// succeeded before the session dropped.
    Failed { reason: String, connected: bool },
}

enum Handshake {
    Connected(Option<String>),
    Failed(String),
    TimedOut,
    Stopped,
}

enum SessionEnd {
    Disconnected(String),
    TimedOut,
    Stopped,
}

/// Owns the reconnect loop task and the state it shares with the façade.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    stats_interval: Duration,
    channels: Arc<Mutex<DataChannelManager>>,
    hub: EventHub<ClientEvent>,
    state: RwLock<ConnectionState>,
    stop_tx: watch::Sender<bool>,
    session: Mutex<Option<Arc<dyn SessionControl>>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &LinkConfig,
        channels: Arc<Mutex<DataChannelManager>>,
        hub: EventHub<ClientEvent>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                transport,
                reconnect: config.reconnect.clone(),
                connect_timeout: config.link.connect_timeout(),
                stats_interval: Duration::from_millis(config.stats.log_interval_ms.max(1)),
                channels,
                hub,
                state: RwLock::new(ConnectionState::Idle),
                stop_tx,
                session: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// True while the loop task is alive (connecting, connected, or backing off).
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawns the connection loop.  Returns `false` if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("connection loop already running");
            return false;
        }
        self.inner.stop_tx.send_replace(false);
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.run_loop()));
        true
    }

    /// Restarts an idle or stopped loop with a fresh retry budget.
    pub fn restart(&self) -> bool {
        let started = self.start();
        if started {
            info!("connection loop restarted");
        }
        started
    }

    /// Requests shutdown and force-closes the live session, if any.
    ///
    /// Returns immediately; use [`shutdown`](Self::shutdown) to also wait for
    /// the loop task to exit.
    pub fn stop(&self) {
        self.inner.stop_tx.send_replace(true);
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            debug!("closing active session on stop");
            session.close();
        }
        if !self.is_running() {
            self.inner.set_state(ConnectionState::Stopped);
        }
    }

    /// Stops the loop and waits for its task to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("connection loop task ended abnormally: {e}");
            }
        }
        self.inner.set_state(ConnectionState::Stopped);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.stop_tx.send_replace(true);
        if let Some(session) = self.inner.session.lock().take() {
            session.close();
        }
    }
}

/// Resolves once the stop flag is raised (or its sender is gone).
async fn wait_stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}

impl Inner {
    async fn run_loop(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if *stop_rx.borrow() {
                break;
            }
            if attempt >= self.reconnect.max_attempts {
                warn!(attempts = attempt, "reconnect budget exhausted; idling until restart");
                self.publish(ClientEvent::Error(format!(
                    "reconnect budget exhausted after {attempt} attempts"
                )));
                self.set_state(ConnectionState::Idle);
                return;
            }

            let (reason, connected) = match self.run_attempt(attempt + 1, &mut stop_rx).await {
                AttemptOutcome::Stopped => break,
                AttemptOutcome::Failed { reason, connected } => (reason, connected),
            };
            if *stop_rx.borrow() {
                break;
            }

            if connected {
                attempt = 0;
            }
            attempt += 1;
            let delay = self.reconnect.backoff_delay(attempt);
            self.publish(ClientEvent::Error(reason.clone()));
            if attempt < self.reconnect.max_attempts {
                warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "connection attempt failed; retrying");
                self.publish(ClientEvent::Reconnecting { attempt, delay });
                self.set_state(ConnectionState::Reconnecting);
            } else {
                // Last permitted failure: hold the failure state through the
                // final wait, then idle.  No retry is announced.
                warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "connection attempt failed; no retries left");
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_stopped(&mut stop_rx) => break,
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("connection loop stopped");
    }

    async fn run_attempt(&self, number: u32, stop_rx: &mut watch::Receiver<bool>) -> AttemptOutcome {
        self.channels.lock().reset(None);
        self.set_state(ConnectionState::Connecting);
        debug!(attempt = number, "opening session");

        let deadline = Instant::now() + self.connect_timeout;
        let opened = tokio::select! {
            r = tokio::time::timeout_at(deadline, self.transport.open()) => r,
            _ = wait_stopped(stop_rx) => return AttemptOutcome::Stopped,
        };
        let Session { mut events, control } = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(attempt = number, error = %e, "failed to open session");
                self.set_state(ConnectionState::Error);
                return AttemptOutcome::Failed {
                    reason: e.to_string(),
                    connected: false,
                };
            }
            Err(_) => {
                warn!(attempt = number, "timed out opening session");
                self.set_state(ConnectionState::Timeout);
                return AttemptOutcome::Failed {
                    reason: "connect timed out".into(),
                    connected: false,
                };
            }
        };

        *self.session.lock() = Some(Arc::clone(&control));
        self.channels.lock().attach_session(Arc::clone(&control));
        if *stop_rx.borrow() {
            self.end_session(&control);
            return AttemptOutcome::Stopped;
        }

        // ── Handshake ────────────────────────────────────────────────────────
        let handshake = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Connected { connection_id }) => break Handshake::Connected(connection_id),
                    Some(SessionEvent::Disconnected { reason }) => break Handshake::Failed(reason),
                    Some(SessionEvent::Timeout) => break Handshake::TimedOut,
                    Some(other) => self.dispatch(other),
                    None => break Handshake::Failed("session ended during handshake".into()),
                },
                _ = tokio::time::sleep_until(deadline) => break Handshake::TimedOut,
                _ = wait_stopped(stop_rx) => break Handshake::Stopped,
            }
        };

        match handshake {
            Handshake::Connected(connection_id) => {
                info!(attempt = number, connection_id = ?connection_id, "session connected");
                self.set_state(ConnectionState::Connected);
                self.publish(ClientEvent::Open);
            }
            Handshake::Failed(reason) => {
                self.end_session(&control);
                if *stop_rx.borrow() {
                    return AttemptOutcome::Stopped;
                }
                self.set_state(ConnectionState::Error);
                return AttemptOutcome::Failed {
                    reason: format!("handshake failed: {reason}"),
                    connected: false,
                };
            }
            Handshake::TimedOut => {
                self.end_session(&control);
                self.set_state(ConnectionState::Timeout);
                return AttemptOutcome::Failed {
                    reason: "handshake timed out".into(),
                    connected: false,
                };
            }
            Handshake::Stopped => {
                self.end_session(&control);
                return AttemptOutcome::Stopped;
            }
        }

        // ── Connected ────────────────────────────────────────────────────────
        let mut stats_tick = tokio::time::interval(self.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Disconnected { reason }) => break SessionEnd::Disconnected(reason),
                    Some(SessionEvent::Timeout) => break SessionEnd::TimedOut,
                    Some(SessionEvent::Connected { .. }) => debug!("ignoring repeated connected event"),
                    Some(other) => self.dispatch(other),
                    None => break SessionEnd::Disconnected("session event stream ended".into()),
                },
                _ = stats_tick.tick() => {
                    self.channels.lock().maybe_log_stats(Instant::now());
                }
                _ = wait_stopped(stop_rx) => break SessionEnd::Stopped,
            }
        };

        self.end_session(&control);
        let stopping = *stop_rx.borrow();
        let (reason, next_state) = match end {
            SessionEnd::Disconnected(reason) => (reason, ConnectionState::Reconnecting),
            SessionEnd::TimedOut => ("session timed out".to_string(), ConnectionState::Timeout),
            SessionEnd::Stopped => ("stopped".to_string(), ConnectionState::Stopped),
        };
        info!(%reason, "session closed");
        self.set_state(if stopping { ConnectionState::Stopped } else { next_state });
        self.publish(ClientEvent::Close {
            reason: reason.clone(),
        });

        if stopping {
            AttemptOutcome::Stopped
        } else {
            AttemptOutcome::Failed {
                reason,
                connected: true,
            }
        }
    }

    /// Routes a channel-level or notify event.
    fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::Notify(value) => self.on_notify(value),
            other => {
                let events = self.channels.lock().handle_event(other, Instant::now());
                for event in events {
                    self.publish(event);
                }
            }
        }
    }

    fn on_notify(&self, value: Value) {
        if value.get("event_type").and_then(Value::as_str) == Some(CONNECTION_CREATED) {
            let connection_id = value.get("connection_id").and_then(Value::as_str);
            info!(connection_id = ?connection_id, "connection created");
        } else {
            debug!(notify = %value, "session notify");
        }
        self.publish(ClientEvent::Notify(value));
    }

    fn end_session(&self, control: &Arc<dyn SessionControl>) {
        control.close();
        let mut slot = self.session.lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, control)) {
            *slot = None;
        }
        drop(slot);
        self.channels.lock().reset(None);
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "connection state changed");
            self.publish(ClientEvent::StateChanged(next));
        }
    }

    fn publish(&self, event: ClientEvent) {
        self.hub.emit(&event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::StatsConfig;
    use crate::infrastructure::transport::mock::{MockTransport, ScriptedOpen};

    struct Harness {
        transport: Arc<MockTransport>,
        manager: ConnectionManager,
        channels: Arc<Mutex<DataChannelManager>>,
        events: Arc<Mutex<Vec<ClientEvent>>>,
    }

    fn harness(fallback: ScriptedOpen) -> Harness {
        let config = LinkConfig::default();
        let transport = Arc::new(MockTransport::new(
            &config.link.ctrl_label,
            &config.link.state_label,
            fallback,
        ));
        let channels = Arc::new(Mutex::new(DataChannelManager::new(
            &config.link.ctrl_label,
            &config.link.state_label,
            StatsConfig::default(),
        )));
        let hub = EventHub::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        for name in ["state-changed", "open", "close", "error", "reconnecting", "notify"] {
            let sink = Arc::clone(&events);
            hub.subscribe(name, move |e: &ClientEvent| sink.lock().push(e.clone()));
        }
        let manager = ConnectionManager::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            &config,
            Arc::clone(&channels),
            hub,
        );
        Harness {
            transport,
            manager,
            channels,
            events,
        }
    }

    fn states(events: &[ClientEvent]) -> Vec<ConnectionState> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_reaches_connected_and_opens_channels() {
        // Arrange
        let h = harness(ScriptedOpen::Connect);

        // Act
        assert!(h.manager.start());
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert!(h.channels.lock().is_ctrl_ready());
        assert!(h.channels.lock().is_state_ready());
        let events = h.events.lock().clone();
        assert_eq!(
            states(&events),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert!(events.contains(&ClientEvent::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_does_not_spawn_second_loop() {
        let h = harness(ScriptedOpen::Connect);

        assert!(h.manager.start());
        assert!(!h.manager.start());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_sets_timeout_state() {
        // Arrange – the session opens but never reports Connected
        let h = harness(ScriptedOpen::Hang);

        // Act
        h.manager.start();
        tokio::time::sleep(Duration::from_millis(10_100)).await;

        // Assert
        let events = h.events.lock().clone();
        assert!(states(&events).contains(&ConnectionState::Timeout));
        assert!(events.contains(&ClientEvent::Error("handshake timed out".into())));
        assert!(h.transport.last_session().unwrap().control().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_error_sets_error_state_and_schedules_retry() {
        let h = harness(ScriptedOpen::Fail("refused".into()));

        h.manager.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = h.events.lock().clone();
        assert!(states(&events).contains(&ConnectionState::Error));
        assert!(events.contains(&ClientEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(500)
        }));
        assert_eq!(h.manager.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_idles_and_restart_resumes() {
        // Arrange
        let h = harness(ScriptedOpen::Fail("refused".into()));
        h.manager.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert!(!h.manager.is_running());
        assert_eq!(h.transport.open_count(), 3);

        // Act
        h.transport.push([ScriptedOpen::Connect]);
        assert!(h.manager.restart());
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.transport.open_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_failure_does_not_announce_a_retry() {
        // Arrange – opens at 0, 500 and 1500 ms all fail
        let h = harness(ScriptedOpen::Fail("refused".into()));

        // Act
        h.manager.start();
        tokio::time::sleep(Duration::from_millis(1600)).await;

        // Assert – the third failure keeps its own state; no countdown is shown
        assert_eq!(h.transport.open_count(), 3);
        assert_eq!(h.manager.state(), ConnectionState::Error);
        let attempts: Vec<u32> = h
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Reconnecting { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert_eq!(h.manager.state(), ConnectionState::Error);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.transport.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_connected_closes_without_retry() {
        // Arrange
        let h = harness(ScriptedOpen::Connect);
        h.manager.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Act
        h.manager.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        // Assert
        assert_eq!(h.manager.state(), ConnectionState::Stopped);
        assert_eq!(h.transport.open_count(), 1);
        assert!(h.transport.last_session().unwrap().control().is_closed());
        let events = h.events.lock().clone();
        assert!(events.iter().any(|e| matches!(e, ClientEvent::Close { .. })));
        assert!(!events.iter().any(|e| matches!(e, ClientEvent::Reconnecting { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_handshake_unblocks_wait() {
        let h = harness(ScriptedOpen::Hang);
        h.manager.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.manager.shutdown().await;

        assert_eq!(h.manager.state(), ConnectionState::Stopped);
        assert!(h.transport.last_session().unwrap().control().is_closed());
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_is_republished() {
        // Arrange
        let h = harness(ScriptedOpen::Connect);
        h.manager.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let session = h.transport.last_session().unwrap();

        // Act
        session
            .inject(SessionEvent::Notify(serde_json::json!({
                "event_type": "connection.created",
                "connection_id": "abc"
            })))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        let events = h.events.lock().clone();
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::Notify(v) if v["connection_id"] == "abc")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_session_disconnect_emits_close_and_reconnects() {
        // Arrange
        let h = harness(ScriptedOpen::Connect);
        h.manager.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Act
        h.transport
            .last_session()
            .unwrap()
            .disconnect("peer went away")
            .await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        // Assert
        let events = h.events.lock().clone();
        assert!(events.contains(&ClientEvent::Close {
            reason: "peer went away".into()
        }));
        assert_eq!(h.transport.open_count(), 2);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }
}
