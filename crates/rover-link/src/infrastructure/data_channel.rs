//! Data channel manager: readiness, inbound classification, outbound
//! sequencing, and throughput counters for the two managed channels.
//!
//! # Ownership
//!
//! One `DataChannelManager` lives behind a lock shared by the connection loop
//! (which feeds it [`SessionEvent`]s) and the client façade (which calls
//! [`send_ctrl`](DataChannelManager::send_ctrl)).  Methods never publish
//! events themselves; they return the [`ClientEvent`]s to publish so the
//! caller can do so after releasing the lock.  A subscriber is then free to
//! call back into the manager (e.g. `is_ctrl_ready`) from its handler.
//!
//! # Inbound path
//!
//! ```text
//! Message{label, payload}
//!   → managed label?            (no → ignore)
//!   → state not ready yet?      (re-check readiness via the session registry)
//!   → decode_inbound            (error → warn!, drop)
//!   → State     → seq_ahead?    (no → trace!, drop) → ClientEvent::State
//!   → Heartbeat                                      → ClientEvent::Heartbeat
//!   → Control / Unknown                              → drop
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rover_core::protocol::codec::wall_clock_ms;
use rover_core::{
    decode_inbound, encode_control, seq_ahead, ControlCommand, InboundMessage, OutboundSequence,
    Payload,
};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::domain::config::StatsConfig;
use crate::domain::events::{ChannelKind, ClientEvent};
use crate::infrastructure::transport::{
    ChannelReadyState, DataChannel, SessionControl, SessionEvent,
};

/// Throughput and latency counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelStats {
    /// Control payloads sent.
    pub sent: u64,
    /// Inbound payloads received on managed channels.
    pub received: u64,
    /// Inbound payloads dropped (undecodable or stale).
    pub dropped: u64,
    /// Time from the last control send to the most recent state arrival.
    pub latency_ms: Option<f64>,
    /// Last outbound control sequence number (0 before the first send).
    pub last_ctrl_seq: u32,
    /// Last accepted inbound state sequence number.
    pub last_state_seq: Option<u32>,
}

/// Per-session channel bookkeeping.
pub struct DataChannelManager {
    ctrl_label: String,
    state_label: String,
    stats_config: StatsConfig,
    session: Option<Arc<dyn SessionControl>>,
    /// Handles of currently open managed channels.
    open: HashMap<ChannelKind, Arc<dyn DataChannel>>,
    outbound: OutboundSequence,
    stats: ChannelStats,
    last_ctrl_sent_at: Option<Instant>,
    last_stats_log: Option<(Instant, u64, u64)>,
}

impl DataChannelManager {
    pub fn new(ctrl_label: &str, state_label: &str, stats_config: StatsConfig) -> Self {
        Self {
            ctrl_label: ctrl_label.to_string(),
            state_label: state_label.to_string(),
            stats_config,
            session: None,
            open: HashMap::new(),
            outbound: OutboundSequence::new(),
            stats: ChannelStats::default(),
            last_ctrl_sent_at: None,
            last_stats_log: None,
        }
    }

    /// Clears readiness, sequences, and counters for a new connection attempt.
    pub fn reset(&mut self, session: Option<Arc<dyn SessionControl>>) {
        self.session = session;
        self.open.clear();
        self.outbound.reset();
        self.stats = ChannelStats::default();
        self.last_ctrl_sent_at = None;
        self.last_stats_log = None;
    }

    /// Attaches the session whose registry is used for handle lookups.
    pub fn attach_session(&mut self, session: Arc<dyn SessionControl>) {
        self.session = Some(session);
    }

    pub fn ctrl_label(&self) -> &str {
        &self.ctrl_label
    }

    pub fn state_label(&self) -> &str {
        &self.state_label
    }

    pub fn is_ctrl_ready(&self) -> bool {
        self.open.contains_key(&ChannelKind::Ctrl)
    }

    pub fn is_state_ready(&self) -> bool {
        self.open.contains_key(&ChannelKind::State)
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Maps a label to its managed kind, if any.
    pub fn kind_of(&self, label: &str) -> Option<ChannelKind> {
        if label == self.ctrl_label {
            Some(ChannelKind::Ctrl)
        } else if label == self.state_label {
            Some(ChannelKind::State)
        } else {
            None
        }
    }

    fn label_of(&self, kind: ChannelKind) -> &str {
        match kind {
            ChannelKind::Ctrl => &self.ctrl_label,
            ChannelKind::State => &self.state_label,
        }
    }

    /// Handles one channel-level session event.  Session-level events
    /// (connected, notify, disconnect, timeout) are not handled here.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) -> Vec<ClientEvent> {
        match event {
            SessionEvent::ChannelEstablished { label, channel } => {
                self.on_channel_established(&label, channel)
            }
            SessionEvent::ChannelOpen { label, channel } => self.on_channel_open(&label, channel),
            SessionEvent::ChannelClose { label, channel } => {
                self.on_channel_close(&label, &channel)
            }
            SessionEvent::ChannelError { label, message } => {
                if self.kind_of(&label).is_none() {
                    return Vec::new();
                }
                warn!(%label, %message, "data channel error");
                vec![ClientEvent::Error(format!("data channel {label}: {message}"))]
            }
            SessionEvent::Message { label, payload } => self.on_message(&label, &payload, now),
            other => {
                trace!(?other, "session event not handled by channel manager");
                Vec::new()
            }
        }
    }

    /// A channel was announced.  The handle is taken from the event if
    /// present, otherwise from the session registry.
    pub fn on_channel_established(
        &mut self,
        label: &str,
        channel: Option<Arc<dyn DataChannel>>,
    ) -> Vec<ClientEvent> {
        let Some(kind) = self.kind_of(label) else {
            debug!(%label, "ignoring unmanaged data channel");
            return Vec::new();
        };
        let Some(channel) = channel.or_else(|| self.lookup(label)) else {
            warn!(%label, "data channel established without a usable handle");
            return Vec::new();
        };

        debug!(%label, id = %channel.id(), "data channel established");
        if channel.ready_state() == ChannelReadyState::Open {
            self.mark_open(kind, channel)
        } else {
            Vec::new()
        }
    }

    /// A channel reported open.
    pub fn on_channel_open(&mut self, label: &str, channel: Arc<dyn DataChannel>) -> Vec<ClientEvent> {
        let Some(kind) = self.kind_of(label) else {
            return Vec::new();
        };
        self.mark_open(kind, channel)
    }

    /// A channel reported closed.  Readiness is only cleared when the closing
    /// handle is the one currently stored; a late close from a replaced
    /// channel is ignored.
    pub fn on_channel_close(&mut self, label: &str, channel: &Arc<dyn DataChannel>) -> Vec<ClientEvent> {
        let Some(kind) = self.kind_of(label) else {
            return Vec::new();
        };
        match self.open.get(&kind) {
            Some(current) if current.id() == channel.id() => {
                self.open.remove(&kind);
                info!(%label, "data channel closed");
                vec![ClientEvent::ChannelClose {
                    kind,
                    label: label.to_string(),
                }]
            }
            _ => {
                debug!(%label, id = %channel.id(), "ignoring close of stale channel handle");
                Vec::new()
            }
        }
    }

    /// An inbound payload arrived.
    pub fn on_message(&mut self, label: &str, payload: &Payload, now: Instant) -> Vec<ClientEvent> {
        if self.kind_of(label).is_none() {
            trace!(%label, "message on unmanaged channel ignored");
            return Vec::new();
        }
        self.stats.received += 1;

        let mut events = Vec::new();
        if !self.is_state_ready() {
            events.extend(self.recheck_state_readiness());
        }

        let message = match decode_inbound(payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.dropped += 1;
                warn!(%label, error = %e, "dropping undecodable payload");
                return events;
            }
        };

        match message {
            InboundMessage::State(snapshot) => {
                if !seq_ahead(snapshot.seq, self.stats.last_state_seq) {
                    self.stats.dropped += 1;
                    trace!(
                        seq = snapshot.seq,
                        last = ?self.stats.last_state_seq,
                        "dropping stale state"
                    );
                    return events;
                }
                self.stats.last_state_seq = Some(snapshot.seq);
                if let Some(sent_at) = self.last_ctrl_sent_at {
                    self.stats.latency_ms =
                        Some(now.saturating_duration_since(sent_at).as_secs_f64() * 1000.0);
                }
                events.push(ClientEvent::State(snapshot));
            }
            InboundMessage::Heartbeat(mut heartbeat) => {
                if heartbeat.label.is_empty() {
                    heartbeat.label = label.to_string();
                }
                events.push(ClientEvent::Heartbeat(heartbeat));
            }
            other => trace!(kind = other.kind(), %label, "dropping unclassified message"),
        }
        events
    }

    /// Encodes, sequences, and sends a control payload.
    ///
    /// Returns `false` without consuming a sequence number when the control
    /// channel is not ready or the send fails.
    pub fn send_ctrl(&mut self, command: ControlCommand, now: Instant) -> bool {
        let Some(channel) = self.open.get(&ChannelKind::Ctrl).cloned() else {
            debug!("control channel not ready; command not sent");
            return false;
        };

        let mut next = self.outbound.clone();
        let seq = next.next();
        let bytes = match encode_control(command, seq, wall_clock_ms()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode control payload");
                return false;
            }
        };
        if let Err(e) = channel.send(&bytes) {
            warn!(seq, error = %e, "failed to send control payload");
            return false;
        }

        self.outbound = next;
        self.stats.sent += 1;
        self.stats.last_ctrl_seq = seq;
        self.last_ctrl_sent_at = Some(now);
        trace!(seq, "control payload sent");
        true
    }

    /// Logs a stats line if `log_interval_ms` has elapsed since the last one.
    ///
    /// Quiet intervals are skipped unless `verbose` is set.  Returns `true`
    /// if a line was written.
    pub fn maybe_log_stats(&mut self, now: Instant) -> bool {
        let interval = Duration::from_millis(self.stats_config.log_interval_ms);
        let (since, prev_sent, prev_received) = match self.last_stats_log {
            Some(last) => last,
            None => {
                self.last_stats_log = Some((now, self.stats.sent, self.stats.received));
                return false;
            }
        };
        if now.saturating_duration_since(since) < interval {
            return false;
        }
        self.last_stats_log = Some((now, self.stats.sent, self.stats.received));

        let sent = self.stats.sent - prev_sent;
        let received = self.stats.received - prev_received;
        if sent == 0 && received == 0 && !self.stats_config.verbose {
            return false;
        }
        info!(
            sent,
            received,
            dropped = self.stats.dropped,
            latency_ms = ?self.stats.latency_ms,
            ctrl_ready = self.is_ctrl_ready(),
            state_ready = self.is_state_ready(),
            "data channel stats"
        );
        true
    }

    fn lookup(&self, label: &str) -> Option<Arc<dyn DataChannel>> {
        self.session.as_ref().and_then(|s| s.channel(label))
    }

    fn mark_open(&mut self, kind: ChannelKind, channel: Arc<dyn DataChannel>) -> Vec<ClientEvent> {
        if let Some(current) = self.open.get(&kind) {
            if current.id() == channel.id() {
                trace!(label = %self.label_of(kind), "data channel readiness re-confirmed");
                return Vec::new();
            }
        }
        let label = self.label_of(kind).to_string();
        info!(%label, id = %channel.id(), "data channel open");
        self.open.insert(kind, channel);
        vec![ClientEvent::ChannelOpen { kind, label }]
    }

    fn recheck_state_readiness(&mut self) -> Vec<ClientEvent> {
        let label = self.state_label.clone();
        match self.lookup(&label) {
            Some(channel) if channel.ready_state() == ChannelReadyState::Open => {
                debug!(%label, "state channel found open on message arrival");
                self.mark_open(ChannelKind::State, channel)
            }
            _ => Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::{ChannelId, MockDataChannel, TransportError};
    use parking_lot::Mutex;

    const CTRL: &str = "#ctrl";
    const STATE: &str = "#state";

    fn manager() -> DataChannelManager {
        DataChannelManager::new(CTRL, STATE, StatsConfig::default())
    }

    /// A mocked open channel that records sent payloads.
    fn recording_channel(id: u64, label: &str) -> (Arc<dyn DataChannel>, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let mut mock = MockDataChannel::new();
        mock.expect_id().return_const(ChannelId(id));
        mock.expect_label().return_const(label.to_string());
        mock.expect_ready_state()
            .return_const(ChannelReadyState::Open);
        mock.expect_send().returning(move |bytes| {
            sink.lock().push(String::from_utf8_lossy(bytes).into_owned());
            Ok(())
        });
        (Arc::new(mock), sent)
    }

    fn silent_channel(id: u64, label: &str, state: ChannelReadyState) -> Arc<dyn DataChannel> {
        let mut mock = MockDataChannel::new();
        mock.expect_id().return_const(ChannelId(id));
        mock.expect_label().return_const(label.to_string());
        mock.expect_ready_state().return_const(state);
        mock.expect_send().never();
        Arc::new(mock)
    }

    struct Registry(Mutex<HashMap<String, Arc<dyn DataChannel>>>);

    impl SessionControl for Registry {
        fn close(&self) {}
        fn channel(&self, label: &str) -> Option<Arc<dyn DataChannel>> {
            self.0.lock().get(label).cloned()
        }
    }

    #[test]
    fn test_open_sets_readiness_and_emits_event() {
        // Arrange
        let mut dcm = manager();
        let (ctrl, _) = recording_channel(1, CTRL);

        // Act
        let events = dcm.on_channel_open(CTRL, ctrl);

        // Assert
        assert!(dcm.is_ctrl_ready());
        assert!(!dcm.is_state_ready());
        assert_eq!(
            events,
            vec![ClientEvent::ChannelOpen {
                kind: ChannelKind::Ctrl,
                label: CTRL.into()
            }]
        );
    }

    #[test]
    fn test_redelivered_open_only_reconfirms() {
        let mut dcm = manager();
        let (ctrl, _) = recording_channel(1, CTRL);

        dcm.on_channel_established(CTRL, Some(Arc::clone(&ctrl)));
        let again = dcm.on_channel_open(CTRL, ctrl);

        assert!(again.is_empty());
        assert!(dcm.is_ctrl_ready());
    }

    #[test]
    fn test_unmanaged_label_is_ignored() {
        let mut dcm = manager();
        let other = silent_channel(9, "#video", ChannelReadyState::Open);

        assert!(dcm.on_channel_open("#video", other).is_empty());
        assert!(!dcm.is_ctrl_ready() && !dcm.is_state_ready());
    }

    #[test]
    fn test_channel_error_surfaces_as_error_event() {
        // Arrange
        let mut dcm = manager();
        let now = Instant::now();

        // Act
        let managed = dcm.handle_event(
            SessionEvent::ChannelError {
                label: CTRL.into(),
                message: "sctp failure".into(),
            },
            now,
        );
        let unmanaged = dcm.handle_event(
            SessionEvent::ChannelError {
                label: "#video".into(),
                message: "sctp failure".into(),
            },
            now,
        );

        // Assert
        assert_eq!(
            managed,
            vec![ClientEvent::Error("data channel #ctrl: sctp failure".into())]
        );
        assert!(unmanaged.is_empty());
    }

    #[test]
    fn test_established_without_handle_uses_session_registry() {
        // Arrange
        let mut dcm = manager();
        let state = silent_channel(2, STATE, ChannelReadyState::Open);
        let registry = Registry(Mutex::new(HashMap::from([(STATE.to_string(), state)])));
        dcm.attach_session(Arc::new(registry));

        // Act
        let events = dcm.on_channel_established(STATE, None);

        // Assert
        assert!(dcm.is_state_ready());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_established_while_connecting_does_not_mark_ready() {
        let mut dcm = manager();
        let ch = silent_channel(3, STATE, ChannelReadyState::Connecting);
        assert!(dcm.on_channel_established(STATE, Some(ch)).is_empty());
        assert!(!dcm.is_state_ready());
    }

    #[test]
    fn test_close_of_stale_handle_keeps_readiness() {
        // Arrange – channel 1 replaced by channel 2
        let mut dcm = manager();
        let old = silent_channel(1, CTRL, ChannelReadyState::Open);
        let new = silent_channel(2, CTRL, ChannelReadyState::Open);
        dcm.on_channel_open(CTRL, Arc::clone(&old));
        dcm.on_channel_open(CTRL, Arc::clone(&new));

        // Act
        let stale = dcm.on_channel_close(CTRL, &old);
        let current = dcm.on_channel_close(CTRL, &new);

        // Assert
        assert!(stale.is_empty());
        assert_eq!(current.len(), 1);
        assert!(!dcm.is_ctrl_ready());
    }

    #[test]
    fn test_send_when_not_ready_returns_false_and_keeps_sequence() {
        let mut dcm = manager();

        assert!(!dcm.send_ctrl("UP".into(), Instant::now()));
        assert_eq!(dcm.stats().sent, 0);
        assert_eq!(dcm.stats().last_ctrl_seq, 0);
    }

    #[test]
    fn test_send_sequences_without_gaps() {
        // Arrange
        let mut dcm = manager();
        let (ctrl, sent) = recording_channel(1, CTRL);
        dcm.on_channel_open(CTRL, ctrl);

        // Act
        for _ in 0..5 {
            assert!(dcm.send_ctrl("UP".into(), Instant::now()));
        }

        // Assert
        let seqs: Vec<u64> = sent
            .lock()
            .iter()
            .map(|t| serde_json::from_str::<serde_json::Value>(t).unwrap()["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(dcm.stats().sent, 5);
    }

    #[test]
    fn test_failed_send_does_not_consume_sequence() {
        // Arrange
        let mut dcm = manager();
        let mut mock = MockDataChannel::new();
        mock.expect_id().return_const(ChannelId(1));
        mock.expect_label().return_const(CTRL.to_string());
        mock.expect_ready_state().return_const(ChannelReadyState::Open);
        let mut calls = 0;
        mock.expect_send().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(TransportError::Closed)
            } else {
                Ok(())
            }
        });
        dcm.on_channel_open(CTRL, Arc::new(mock));

        // Act
        let first = dcm.send_ctrl("UP".into(), Instant::now());
        let second = dcm.send_ctrl("UP".into(), Instant::now());

        // Assert
        assert!(!first);
        assert!(second);
        assert_eq!(dcm.stats().last_ctrl_seq, 1);
    }

    #[test]
    fn test_state_and_heartbeat_classification() {
        let mut dcm = manager();
        let now = Instant::now();

        let state = dcm.on_message(STATE, &Payload::from(r#"{"type":"state","seq":1}"#), now);
        let hb = dcm.on_message(STATE, &Payload::from(r#"{"type":"hb","hb_age_ms":5}"#), now);
        let unknown = dcm.on_message(STATE, &Payload::from(r#"{"type":"video"}"#), now);

        assert!(matches!(state.as_slice(), [ClientEvent::State(s)] if s.seq == 1));
        assert!(matches!(hb.as_slice(), [ClientEvent::Heartbeat(h)] if h.label == STATE));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_stale_state_is_dropped() {
        let mut dcm = manager();
        let now = Instant::now();
        dcm.on_message(STATE, &Payload::from(r#"{"type":"state","seq":10}"#), now);

        let dup = dcm.on_message(STATE, &Payload::from(r#"{"type":"state","seq":10}"#), now);
        let old = dcm.on_message(STATE, &Payload::from(r#"{"type":"state","seq":9}"#), now);

        assert!(dup.is_empty() && old.is_empty());
        assert_eq!(dcm.stats().dropped, 2);
    }

    #[test]
    fn test_invalid_payload_is_dropped() {
        let mut dcm = manager();
        let events = dcm.on_message(STATE, &Payload::Binary(vec![0xff, 0x00]), Instant::now());
        assert!(events.is_empty());
        assert_eq!(dcm.stats().dropped, 1);
    }

    #[test]
    fn test_message_triggers_state_readiness_recheck() {
        // Arrange – state channel open in the registry but no open event yet
        let mut dcm = manager();
        let state = silent_channel(4, STATE, ChannelReadyState::Open);
        dcm.attach_session(Arc::new(Registry(Mutex::new(HashMap::from([(
            STATE.to_string(),
            state,
        )])))));

        // Act
        let events = dcm.on_message(
            STATE,
            &Payload::from(r#"{"type":"state","seq":1}"#),
            Instant::now(),
        );

        // Assert
        assert!(dcm.is_state_ready());
        assert!(matches!(events[0], ClientEvent::ChannelOpen { kind: ChannelKind::State, .. }));
        assert!(matches!(events[1], ClientEvent::State(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_proxy_measures_since_last_ctrl_send() {
        // Arrange
        let mut dcm = manager();
        let (ctrl, _) = recording_channel(1, CTRL);
        dcm.on_channel_open(CTRL, ctrl);
        dcm.send_ctrl("UP".into(), Instant::now());

        // Act
        tokio::time::advance(Duration::from_millis(40)).await;
        dcm.on_message(
            STATE,
            &Payload::from(r#"{"type":"state","seq":1}"#),
            Instant::now(),
        );

        // Assert
        let latency = dcm.stats().latency_ms.unwrap();
        assert!((latency - 40.0).abs() < 1.0, "latency={latency}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_log_is_rate_limited_and_quiet_when_idle() {
        let mut dcm = manager();
        let start = Instant::now();

        assert!(!dcm.maybe_log_stats(start));
        dcm.on_message(STATE, &Payload::from(r#"{"type":"hb"}"#), start);
        assert!(!dcm.maybe_log_stats(start + Duration::from_millis(500)));
        assert!(dcm.maybe_log_stats(start + Duration::from_millis(1000)));
        // nothing flowed since the last line
        assert!(!dcm.maybe_log_stats(start + Duration::from_millis(2000)));
    }

    #[test]
    fn test_reset_clears_readiness_and_sequence() {
        let mut dcm = manager();
        let (ctrl, _) = recording_channel(1, CTRL);
        dcm.on_channel_open(CTRL, ctrl);
        dcm.send_ctrl("UP".into(), Instant::now());

        dcm.reset(None);

        assert!(!dcm.is_ctrl_ready());
        assert_eq!(dcm.stats(), ChannelStats::default());
    }
}
