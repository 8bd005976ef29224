//! Transport adapter: the only seam between rover-link and a concrete
//! session implementation (WebSocket relay, WebRTC stack, in-memory mock).
//!
//! # Overview (for beginners)
//!
//! A [`Transport`] opens one [`Session`] per connection attempt.  A session
//! is two things:
//!
//! - a stream of [`SessionEvent`]s (handshake done, channel opened, message
//!   arrived, disconnected, …) delivered on an `mpsc` channel, and
//! - a [`SessionControl`] handle for forcing the session closed and looking
//!   up channels by label.
//!
//! Channels are exposed as normalized [`DataChannel`] handles, so the rest of
//! the crate never has to guess at the shape of a binding-specific object.

pub mod mock;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rover_core::Payload;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by a transport binding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The underlying connection could not be established.
    #[error("failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// The session or channel is already closed.
    #[error("session closed")]
    Closed,

    /// A send on an open channel failed.
    #[error("send on {label} failed: {reason}")]
    Send { label: String, reason: String },

    /// The peer rejected or aborted the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Process-unique identity of a physical channel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Ready state of a channel, mirroring the usual data-channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A normalized handle to one logical data channel.
#[cfg_attr(test, mockall::automock)]
pub trait DataChannel: Send + Sync {
    fn id(&self) -> ChannelId;
    fn label(&self) -> String;
    fn ready_state(&self) -> ChannelReadyState;

    /// Queues `bytes` for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the channel is not open, or
    /// [`TransportError::Send`] if the binding failed to queue the data.
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

impl fmt::Debug for dyn DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// Control side of an open session.
pub trait SessionControl: Send + Sync {
    /// Forces the session closed.  Idempotent.
    fn close(&self);

    /// Session-held channel registry lookup.
    fn channel(&self, label: &str) -> Option<Arc<dyn DataChannel>>;
}

/// Everything a session reports, in delivery order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connect handshake completed.
    Connected { connection_id: Option<String> },
    /// The peer announced a channel.  The handle may be absent, in which
    /// case it is looked up through [`SessionControl::channel`].
    ChannelEstablished {
        label: String,
        channel: Option<Arc<dyn DataChannel>>,
    },
    ChannelOpen {
        label: String,
        channel: Arc<dyn DataChannel>,
    },
    ChannelClose {
        label: String,
        channel: Arc<dyn DataChannel>,
    },
    ChannelError { label: String, message: String },
    Message { label: String, payload: Payload },
    /// A session-level notification, passed through untouched.
    Notify(Value),
    Disconnected { reason: String },
    Timeout,
}

/// One open session.
pub struct Session {
    pub events: mpsc::Receiver<SessionEvent>,
    pub control: Arc<dyn SessionControl>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Opens sessions.  One call per connection attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts a new session.
    ///
    /// Returning `Ok` does not mean the handshake is complete; that is
    /// signalled later by [`SessionEvent::Connected`].
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the session could not be started.
    async fn open(&self) -> Result<Session, TransportError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ids_are_unique() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_mock_channel_debug_shows_label() {
        // Arrange
        let mut mock = MockDataChannel::new();
        mock.expect_id().return_const(ChannelId(7));
        mock.expect_label().return_const("#ctrl".to_string());
        mock.expect_ready_state()
            .return_const(ChannelReadyState::Open);
        let channel: Arc<dyn DataChannel> = Arc::new(mock);

        // Act
        let text = format!("{channel:?}");

        // Assert
        assert!(text.contains("#ctrl"), "{text}");
        assert!(text.contains("Open"), "{text}");
    }

    #[test]
    fn test_transport_error_messages() {
        let err = TransportError::Handshake("rejected".into());
        assert_eq!(err.to_string(), "handshake failed: rejected");
        assert_eq!(TransportError::Closed.to_string(), "session closed");
    }
}
