//! `RoverClient`: the single entry point collaborators use.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rover_link::infrastructure::{WsTransport, WsTransportConfig};
//! use rover_link::{ClientEvent, LinkConfig, RoverClient};
//!
//! # async fn run() {
//! let config = LinkConfig::default();
//! let transport = Arc::new(WsTransport::new(WsTransportConfig::from_link_config(&config)));
//! let client = RoverClient::new(transport, &config);
//!
//! client.subscribe("channel-open", |ev: &ClientEvent| println!("{ev:?}"));
//! client.start();
//!
//! if client.is_ctrl_ready() {
//!     client.send_ctrl("UP");
//! }
//! client.shutdown().await;
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use rover_core::protocol::TYPE_HEARTBEAT;
use rover_core::{ControlCommand, EventHub, SubscriptionId};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::domain::config::LinkConfig;
use crate::domain::events::{ClientEvent, ConnectionState};
use crate::infrastructure::connection::ConnectionManager;
use crate::infrastructure::data_channel::{ChannelStats, DataChannelManager};
use crate::infrastructure::transport::Transport;

/// Façade over the connection manager, the data channel manager, and the
/// event hub.
pub struct RoverClient {
    hub: EventHub<ClientEvent>,
    channels: Arc<Mutex<DataChannelManager>>,
    connection: ConnectionManager,
}

impl RoverClient {
    pub fn new(transport: Arc<dyn Transport>, config: &LinkConfig) -> Self {
        let hub = EventHub::new();
        let channels = Arc::new(Mutex::new(DataChannelManager::new(
            &config.link.ctrl_label,
            &config.link.state_label,
            config.stats.clone(),
        )));
        let connection =
            ConnectionManager::new(transport, config, Arc::clone(&channels), hub.clone());
        Self {
            hub,
            channels,
            connection,
        }
    }

    /// Starts the connection loop.  Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        self.connection.start()
    }

    /// Requests shutdown without waiting for the loop to exit.
    pub fn stop(&self) {
        self.connection.stop();
    }

    /// Restarts the loop after the retry budget ran out or after a stop.
    pub fn restart(&self) -> bool {
        self.connection.restart()
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }

    /// Sends a control command on the control channel.
    ///
    /// Returns `false` when the channel is not ready or the send failed.
    /// Neither case consumes a sequence number.
    pub fn send_ctrl(&self, command: impl Into<ControlCommand>) -> bool {
        self.channels.lock().send_ctrl(command.into(), Instant::now())
    }

    /// Sends a `{"type":"hb"}` heartbeat on the control channel.
    pub fn send_heartbeat(&self) -> bool {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(TYPE_HEARTBEAT.to_string()));
        self.send_ctrl(fields)
    }

    pub fn is_ctrl_ready(&self) -> bool {
        self.channels.lock().is_ctrl_ready()
    }

    pub fn is_state_ready(&self) -> bool {
        self.channels.lock().is_state_ready()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn stats(&self) -> ChannelStats {
        self.channels.lock().stats()
    }

    /// The hub every [`ClientEvent`] is published on.
    pub fn events(&self) -> &EventHub<ClientEvent> {
        &self.hub
    }

    pub fn subscribe<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.hub.subscribe(name, handler)
    }

    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(name, id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
