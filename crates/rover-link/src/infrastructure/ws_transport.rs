//! WebSocket binding of the transport adapter.
//!
//! The relay multiplexes the two logical data channels over one WebSocket
//! using small JSON envelopes tagged by `type`:
//!
//! ```text
//! client ──► relay   {"type":"connect","role":"sendrecv","channel_id":…,"client_id":…,
//!                     "metadata":…,"data_channels":[{"label":"#ctrl",…},…]}
//! client ──► relay   {"type":"message","label":"#ctrl","data":"{…}"}
//!
//! relay  ──► client  {"type":"notify","event_type":"connection.created","connection_id":…}
//! relay  ──► client  {"type":"datachannel","label":"#state"}
//! relay  ──► client  {"type":"datachannel.close","label":"#state"}
//! relay  ──► client  {"type":"message","label":"#state","data":"{…}"}
//! relay  ──► client  {"type":"disconnect","reason":…}
//! ```
//!
//! # Tasks per session
//!
//! - **Writer**: drains an unbounded `mpsc` of outbound frames into the
//!   WebSocket sink.  [`WsDataChannel::send`] only enqueues, so it never
//!   blocks the caller.
//! - **Reader**: reads frames, translates each envelope into
//!   [`SessionEvent`]s with an [`EnvelopeTranslator`], and forwards them on
//!   the session's event channel.  A close frame or end of stream becomes
//!   `Disconnected`; an I/O timeout becomes `Timeout`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rover_core::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::transport::{
    ChannelId, ChannelReadyState, DataChannel, Session, SessionControl, SessionEvent, Transport,
    TransportError,
};
use crate::domain::config::LinkConfig;

const SESSION_EVENT_BUFFER: usize = 256;
const CONNECTION_CREATED: &str = "connection.created";

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// One data channel requested on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChannelSpec {
    pub label: String,
    /// `"sendonly"`, `"recvonly"`, or `"sendrecv"`, from this client's side.
    pub direction: String,
    pub ordered: bool,
}

/// Envelopes sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Connect {
        role: String,
        channel_id: String,
        client_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        data_channels: Vec<DataChannelSpec>,
    },
    Message {
        label: String,
        data: String,
    },
}

/// Envelopes sent by the relay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum RelayEnvelope {
    #[serde(rename = "notify")]
    Notify {
        #[serde(default)]
        event_type: Option<String>,
        #[serde(default)]
        connection_id: Option<String>,
    },
    #[serde(rename = "datachannel")]
    DataChannel { label: String },
    #[serde(rename = "datachannel.close")]
    DataChannelClose { label: String },
    #[serde(rename = "message")]
    Message { label: String, data: String },
    #[serde(rename = "disconnect")]
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },
}

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    pub url: String,
    pub channel_id: String,
    pub client_id: Uuid,
    pub metadata: Option<Value>,
    pub ctrl_label: String,
    pub state_label: String,
}

impl WsTransportConfig {
    /// Builds the binding config from the `[link]` section, with a fresh
    /// random client id.
    pub fn from_link_config(config: &LinkConfig) -> Self {
        Self {
            url: config.link.signaling_url.clone(),
            channel_id: config.link.channel_id.clone(),
            client_id: Uuid::new_v4(),
            metadata: config.link.metadata.clone(),
            ctrl_label: config.link.ctrl_label.clone(),
            state_label: config.link.state_label.clone(),
        }
    }

    pub fn connect_envelope(&self) -> ClientEnvelope {
        ClientEnvelope::Connect {
            role: "sendrecv".into(),
            channel_id: self.channel_id.clone(),
            client_id: self.client_id,
            metadata: self.metadata.clone(),
            data_channels: vec![
                DataChannelSpec {
                    label: self.ctrl_label.clone(),
                    direction: "sendonly".into(),
                    ordered: true,
                },
                DataChannelSpec {
                    label: self.state_label.clone(),
                    direction: "recvonly".into(),
                    ordered: true,
                },
            ],
        }
    }
}

// ── Channel handle ────────────────────────────────────────────────────────────

/// A logical channel multiplexed over the session's WebSocket.
#[derive(Debug)]
pub struct WsDataChannel {
    id: ChannelId,
    label: String,
    state: Mutex<ChannelReadyState>,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl WsDataChannel {
    fn new(label: &str, outbound: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self {
            id: ChannelId::next(),
            label: label.to_string(),
            state: Mutex::new(ChannelReadyState::Open),
            outbound,
        }
    }

    fn mark_closed(&self) {
        *self.state.lock() = ChannelReadyState::Closed;
    }
}

impl DataChannel for WsDataChannel {
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
        if self.ready_state() != ChannelReadyState::Open {
            return Err(TransportError::Closed);
        }
        let data = std::str::from_utf8(bytes).map_err(|e| TransportError::Send {
            label: self.label.clone(),
            reason: format!("payload is not UTF-8: {e}"),
        })?;
        let envelope = ClientEnvelope::Message {
            label: self.label.clone(),
            data: data.to_string(),
        };
        let text = serde_json::to_string(&envelope).map_err(|e| TransportError::Send {
            label: self.label.clone(),
            reason: e.to_string(),
        })?;
        self.outbound
            .send(WsMessage::Text(text))
            .map_err(|_| TransportError::Closed)
    }
}

type Registry = Arc<Mutex<HashMap<String, Arc<WsDataChannel>>>>;

// ── Envelope translation ──────────────────────────────────────────────────────

/// Turns relay envelopes into session events, maintaining the channel
/// registry as channels come and go.
#[derive(Debug)]
pub struct EnvelopeTranslator {
    registry: Registry,
    outbound: mpsc::UnboundedSender<WsMessage>,
    connected: bool,
}

impl EnvelopeTranslator {
    fn new(registry: Registry, outbound: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self {
            registry,
            outbound,
            connected: false,
        }
    }

    /// Translates one text frame.  Frames that are not a known envelope
    /// yield no events.
    pub fn translate(&mut self, text: &str) -> Vec<SessionEvent> {
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("relay sent invalid JSON: {e}");
                return Vec::new();
            }
        };
        let envelope: RelayEnvelope = match serde_json::from_value(raw.clone()) {
            Ok(env) => env,
            Err(e) => {
                debug!(frame = %raw, "ignoring unrecognized relay envelope: {e}");
                return Vec::new();
            }
        };

        match envelope {
            RelayEnvelope::Notify {
                event_type,
                connection_id,
            } => {
                let mut events = Vec::with_capacity(2);
                if !self.connected && event_type.as_deref() == Some(CONNECTION_CREATED) {
                    self.connected = true;
                    events.push(SessionEvent::Connected { connection_id });
                }
                events.push(SessionEvent::Notify(raw));
                events
            }
            RelayEnvelope::DataChannel { label } => {
                let channel = Arc::new(WsDataChannel::new(&label, self.outbound.clone()));
                if let Some(previous) = self
                    .registry
                    .lock()
                    .insert(label.clone(), Arc::clone(&channel))
                {
                    previous.mark_closed();
                }
                let handle: Arc<dyn DataChannel> = channel;
                vec![
                    SessionEvent::ChannelEstablished {
                        label: label.clone(),
                        channel: Some(Arc::clone(&handle)),
                    },
                    SessionEvent::ChannelOpen {
                        label,
                        channel: handle,
                    },
                ]
            }
            RelayEnvelope::DataChannelClose { label } => {
                let removed = self.registry.lock().remove(&label);
                match removed {
                    Some(channel) => {
                        channel.mark_closed();
                        vec![SessionEvent::ChannelClose {
                            label,
                            channel,
                        }]
                    }
                    None => Vec::new(),
                }
            }
            RelayEnvelope::Message { label, data } => vec![SessionEvent::Message {
                label,
                payload: Payload::Text(data),
            }],
            RelayEnvelope::Disconnect { reason } => vec![SessionEvent::Disconnected {
                reason: reason.unwrap_or_else(|| "disconnected by relay".into()),
            }],
        }
    }

    fn close_all(&self) {
        for channel in self.registry.lock().values() {
            channel.mark_closed();
        }
    }
}

// ── Session control ───────────────────────────────────────────────────────────

struct WsSessionControl {
    registry: Registry,
    outbound: mpsc::UnboundedSender<WsMessage>,
    events: mpsc::Sender<SessionEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionControl for WsSessionControl {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for channel in self.registry.lock().values() {
            channel.mark_closed();
        }
        let _ = self.outbound.send(WsMessage::Close(None));
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let _ = self.events.try_send(SessionEvent::Disconnected {
            reason: "closed by client".into(),
        });
    }

    fn channel(&self, label: &str) -> Option<Arc<dyn DataChannel>> {
        self.registry
            .lock()
            .get(label)
            .map(|ch| Arc::clone(ch) as Arc<dyn DataChannel>)
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Opens relay sessions over a WebSocket.
#[derive(Debug, Clone)]
pub struct WsTransport {
    config: WsTransportConfig,
}

impl WsTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<Session, TransportError> {
        let url = self.config.url.clone();
        debug!(%url, client_id = %self.config.client_id, "connecting to relay");
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
        let (mut sink, mut stream) = ws_stream.split();

        let connect = serde_json::to_string(&self.config.connect_envelope())
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        sink.send(WsMessage::Text(connect))
            .await
            .map_err(|e| TransportError::ConnectFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        info!(%url, channel_id = %self.config.channel_id, "connect request sent");

        // Writer task: outbound queue → WebSocket sink.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!("relay write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Reader task: WebSocket stream → session events.
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let (ev_tx, ev_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let mut translator = EnvelopeTranslator::new(Arc::clone(&registry), out_tx.clone());
        let reader_tx = ev_tx.clone();
        let reader = tokio::spawn(async move {
            let end = loop {
                let text = match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("relay sent non-UTF-8 binary frame: {e}");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        break SessionEvent::Disconnected {
                            reason: frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by relay".into()),
                        };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(WsError::Io(e))) if e.kind() == std::io::ErrorKind::TimedOut => {
                        break SessionEvent::Timeout;
                    }
                    Some(Err(e)) => break SessionEvent::Disconnected { reason: e.to_string() },
                    None => {
                        break SessionEvent::Disconnected {
                            reason: "relay connection ended".into(),
                        }
                    }
                };
                trace!(frame = %text, "relay frame");
                for event in translator.translate(&text) {
                    if reader_tx.send(event).await.is_err() {
                        return;
                    }
                }
            };
            translator.close_all();
            let _ = reader_tx.send(end).await;
        });

        let control = Arc::new(WsSessionControl {
            registry,
            outbound: out_tx,
            events: ev_tx,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        });

        Ok(Session {
            events: ev_rx,
            control,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
