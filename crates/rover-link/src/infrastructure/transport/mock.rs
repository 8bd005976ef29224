//! Scriptable in-memory transport for tests.
//!
//! Each call to [`Transport::open`] consumes the next [`ScriptedOpen`]
//! outcome.  Sessions that connect expose a [`MockSessionHandle`] so a test
//! can inject inbound traffic and inspect what the client sent.
//!
//! ```text
//! test ──script──► MockTransport ──open()──► Session { events, control }
//!   │                                              ▲
//!   └──── MockSessionHandle::deliver / disconnect ─┘
//! ```
//!
//! Timing uses `tokio::time`, so tests can run with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rover_core::Payload;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    ChannelId, ChannelReadyState, DataChannel, Session, SessionControl, SessionEvent, Transport,
    TransportError,
};

/// What the next `open()` call does.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOpen {
    /// `open()` itself fails with a handshake error.
    Fail(String),
    /// Opens, but never completes the handshake.
    Hang,
    /// Completes the handshake and opens both managed channels.
    Connect,
    /// Like [`ScriptedOpen::Connect`], then disconnects after the delay.
    ConnectThenDrop(Duration),
}

/// In-memory channel that records every payload sent on it.
#[derive(Debug)]
pub struct MockChannel {
    id: ChannelId,
    label: String,
    state: Mutex<ChannelReadyState>,
    sent: Mutex<Vec<Vec<u8>>>,
    fail_sends: AtomicBool,
}

impl MockChannel {
    pub fn new(label: &str) -> Self {
        Self {
            id: ChannelId::next(),
            label: label.to_string(),
            state: Mutex::new(ChannelReadyState::Open),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn set_ready_state(&self, state: ChannelReadyState) {
        *self.state.lock() = state;
    }

    /// Makes every later `send` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Payloads sent so far, decoded as UTF-8 text.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }
}

impl DataChannel for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> ChannelReadyState {
        *self.state.lock()
    }

    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if *self.state.lock() != ChannelReadyState::Open {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send {
                label: self.label.clone(),
                reason: "scripted failure".into(),
            });
        }
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }
}

/// Session control with a label-keyed channel registry.
#[derive(Debug)]
pub struct MockSessionControl {
    channels: Mutex<HashMap<String, Arc<MockChannel>>>,
    closed: AtomicBool,
    tx: mpsc::Sender<SessionEvent>,
}

impl MockSessionControl {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Adds a channel to the registry without announcing it.
    pub fn register(&self, channel: Arc<MockChannel>) {
        self.channels.lock().insert(channel.label.clone(), channel);
    }
}

impl SessionControl for MockSessionControl {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.try_send(SessionEvent::Disconnected {
            reason: "closed by client".into(),
        });
    }

    fn channel(&self, label: &str) -> Option<Arc<dyn DataChannel>> {
        self.channels
            .lock()
            .get(label)
            .map(|ch| Arc::clone(ch) as Arc<dyn DataChannel>)
    }
}

/// Test-side handle onto one opened session.
#[derive(Debug, Clone)]
pub struct MockSessionHandle {
    tx: mpsc::Sender<SessionEvent>,
    control: Arc<MockSessionControl>,
}

impl MockSessionHandle {
    pub fn control(&self) -> &Arc<MockSessionControl> {
        &self.control
    }

    /// Registers a channel and announces it as established and open.
    pub async fn open_channel(&self, label: &str) -> Arc<MockChannel> {
        let channel = Arc::new(MockChannel::new(label));
        self.control.register(Arc::clone(&channel));
        let handle: Arc<dyn DataChannel> = channel.clone();
        self.inject(SessionEvent::ChannelEstablished {
            label: label.to_string(),
            channel: Some(Arc::clone(&handle)),
        })
        .await;
        self.inject(SessionEvent::ChannelOpen {
            label: label.to_string(),
            channel: handle,
        })
        .await;
        channel
    }

    pub fn channel(&self, label: &str) -> Option<Arc<MockChannel>> {
        self.control.channels.lock().get(label).cloned()
    }

    pub async fn inject(&self, event: SessionEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Delivers an inbound text payload on `label`.
    pub async fn deliver(&self, label: &str, text: &str) {
        self.inject(SessionEvent::Message {
            label: label.to_string(),
            payload: Payload::from(text),
        })
        .await;
    }

    pub async fn disconnect(&self, reason: &str) {
        self.inject(SessionEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    }
}

/// Scriptable [`Transport`].
#[derive(Debug)]
pub struct MockTransport {
    labels: (String, String),
    script: Mutex<VecDeque<ScriptedOpen>>,
    fallback: ScriptedOpen,
    opened_at: Mutex<Vec<Instant>>,
    sessions: Mutex<Vec<MockSessionHandle>>,
}

impl MockTransport {
    /// Creates a transport for the given ctrl/state labels.  Once the script
    /// runs out every `open()` behaves like `fallback`.
    pub fn new(ctrl_label: &str, state_label: &str, fallback: ScriptedOpen) -> Self {
        Self {
            labels: (ctrl_label.to_string(), state_label.to_string()),
            script: Mutex::new(VecDeque::new()),
            fallback,
            opened_at: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Appends outcomes to the script.
    pub fn push(&self, outcomes: impl IntoIterator<Item = ScriptedOpen>) {
        self.script.lock().extend(outcomes);
    }

    pub fn open_count(&self) -> usize {
        self.opened_at.lock().len()
    }

    /// Instants at which `open()` was called.
    pub fn opened_at(&self) -> Vec<Instant> {
        self.opened_at.lock().clone()
    }

    /// Handle of the most recently opened session.
    pub fn last_session(&self) -> Option<MockSessionHandle> {
        self.sessions.lock().last().cloned()
    }

    fn new_session(&self) -> (Session, MockSessionHandle) {
        let (tx, rx) = mpsc::channel(256);
        let control = Arc::new(MockSessionControl {
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            tx: tx.clone(),
        });
        let handle = MockSessionHandle {
            tx,
            control: Arc::clone(&control),
        };
        self.sessions.lock().push(handle.clone());
        (
            Session {
                events: rx,
                control,
            },
            handle,
        )
    }

    async fn connect(&self, handle: &MockSessionHandle) {
        handle
            .inject(SessionEvent::Connected {
                connection_id: Some(format!("mock-{}", self.open_count())),
            })
            .await;
        handle.open_channel(&self.labels.0).await;
        handle.open_channel(&self.labels.1).await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<Session, TransportError> {
        self.opened_at.lock().push(Instant::now());
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match outcome {
            ScriptedOpen::Fail(reason) => Err(TransportError::Handshake(reason)),
            ScriptedOpen::Hang => Ok(self.new_session().0),
            ScriptedOpen::Connect => {
                let (session, handle) = self.new_session();
                self.connect(&handle).await;
                Ok(session)
            }
            ScriptedOpen::ConnectThenDrop(after) => {
                let (session, handle) = self.new_session();
                self.connect(&handle).await;
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    handle.disconnect("scripted drop").await;
                });
                Ok(session)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_is_consumed_in_order() {
        // Arrange
        let transport = MockTransport::new("#ctrl", "#state", ScriptedOpen::Hang);
        transport.push([ScriptedOpen::Fail("nope".into()), ScriptedOpen::Connect]);

        // Act
        let first = transport.open().await;
        let second = transport.open().await;

        // Assert
        assert_eq!(first.unwrap_err(), TransportError::Handshake("nope".into()));
        let mut session = second.unwrap();
        assert!(matches!(
            session.events.recv().await,
            Some(SessionEvent::Connected { .. })
        ));
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_registers_both_channels() {
        let transport = MockTransport::new("#ctrl", "#state", ScriptedOpen::Connect);

        let session = transport.open().await.unwrap();

        assert!(session.control.channel("#ctrl").is_some());
        assert!(session.control.channel("#state").is_some());
        assert!(session.control.channel("#other").is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_reports_disconnect() {
        // Arrange
        let transport = MockTransport::new("#ctrl", "#state", ScriptedOpen::Hang);
        let mut session = transport.open().await.unwrap();

        // Act
        session.control.close();
        session.control.close();

        // Assert
        assert!(matches!(
            session.events.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        assert!(session.events.try_recv().is_err());
        assert!(transport.last_session().unwrap().control().is_closed());
    }

    #[test]
    fn test_hung_session_delivers_nothing() {
        // Arrange
        let transport = MockTransport::new("#ctrl", "#state", ScriptedOpen::Hang);
        let mut session = tokio_test::block_on(transport.open()).unwrap();

        // Act
        let mut recv = tokio_test::task::spawn(session.events.recv());

        // Assert
        tokio_test::assert_pending!(recv.poll());
        assert!(session_is_unregistered(&transport));
    }

    fn session_is_unregistered(transport: &MockTransport) -> bool {
        let handle = transport.last_session().unwrap();
        handle.channel("#ctrl").is_none() && !handle.control().is_closed()
    }

    #[test]
    fn test_mock_channel_records_and_refuses_when_closed() {
        let channel = MockChannel::new("#ctrl");
        channel.send(b"{\"a\":1}").unwrap();
        channel.set_ready_state(ChannelReadyState::Closed);

        assert_eq!(channel.send(b"x"), Err(TransportError::Closed));
        assert_eq!(channel.sent_text(), vec!["{\"a\":1}".to_string()]);
    }
}
