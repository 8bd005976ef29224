//! Application layer for rover-link.
//!
//! The application layer is what collaborators (renderer, HUD, input
//! handler) talk to.  It knows *what* to do, but delegates *how* to the
//! infrastructure layer.
//!
//! # Responsibilities
//!
//! - [`client::RoverClient`]: one façade over the connection loop, the
//!   channel manager, and the event hub.
//! - [`state_receiver::StateReceiver`]: subscribes to state/heartbeat events
//!   and drives the playback engine at a fixed tick rate.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or parsing relay envelopes (that is infrastructure)
//! - Interpolation math and sequence arithmetic (that is `rover-core`)

pub mod client;
pub mod state_receiver;

pub use client::RoverClient;
pub use state_receiver::StateReceiver;
