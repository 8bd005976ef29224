//! Infrastructure layer for rover-link.
//!
//! - [`transport`]: the adapter traits every session binding implements,
//!   plus an in-memory scripted binding for tests.
//! - [`ws_transport`]: the WebSocket relay binding used by the binary.
//! - [`data_channel`]: per-session channel readiness, inbound
//!   classification, and outbound sequencing.
//! - [`connection`]: the reconnecting session lifecycle loop.

pub mod connection;
pub mod data_channel;
pub mod transport;
pub mod ws_transport;

pub use connection::ConnectionManager;
pub use data_channel::{ChannelStats, DataChannelManager};
pub use transport::{DataChannel, Session, SessionControl, SessionEvent, Transport, TransportError};
pub use ws_transport::{WsTransport, WsTransportConfig};
