//! Domain layer for rover-link.
//!
//! Plain data types with no I/O: the events the client publishes, the
//! connection state machine's states, and the configuration schema.

pub mod config;
pub mod events;

pub use config::{ConfigError, LinkConfig};
pub use events::{ChannelKind, ClientEvent, ConnectionState};
