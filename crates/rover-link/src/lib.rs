//! rover-link library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does rover-link do? (for beginners)
//!
//! An operator drives a vehicle that sits on the other end of an unreliable
//! network link.  Two logical data channels run over one session:
//!
//! - `#ctrl` carries low-rate control commands from the operator.
//! - `#state` carries high-rate pose/velocity telemetry back from the vehicle.
//!
//! This crate:
//!
//! 1. Opens the session through a pluggable [`Transport`] and keeps it alive,
//!    reconnecting with bounded exponential backoff when it drops.
//! 2. Tracks per-channel readiness, decodes and classifies inbound payloads,
//!    and sequences outbound control payloads.
//! 3. Publishes typed [`ClientEvent`]s on an event hub so collaborators
//!    (HUD, logger, input handler) never touch the transport directly.
//! 4. Runs a [`StateReceiver`] that turns the jittery telemetry stream into
//!    a smooth, slightly delayed playback signal at a fixed tick rate.
//!
//! [`Transport`]: infrastructure::transport::Transport
//! [`ClientEvent`]: domain::events::ClientEvent
//! [`StateReceiver`]: application::state_receiver::StateReceiver

/// Application layer: the client façade and the state receiver.
pub mod application;

/// Domain layer: client events, connection states, and configuration.
pub mod domain;

/// Infrastructure layer: transport adapter, channel manager, connection loop.
pub mod infrastructure;

pub use application::client::RoverClient;
pub use application::state_receiver::StateReceiver;
pub use domain::config::LinkConfig;
pub use domain::events::{ChannelKind, ClientEvent, ConnectionState};
