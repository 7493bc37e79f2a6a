//! Transport seam.
//!
//! The session core treats the underlying connection as a black box with a
//! four-state lifecycle and standard close-code semantics. Production code
//! uses the [`tungstenite`] implementation; tests inject counting stubs
//! through the same traits.
//!
//! Control frames are the crate's own JSON envelopes
//! (`{"type":"ping","ts":..}` / `{"type":"pong","ts":..}`); every other
//! payload passes through to subscribers unexamined.

pub mod tungstenite;

use crate::channel::ChannelSpec;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Normal closure (RFC 6455).
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Abnormal closure (no close frame received).
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close information delivered with [`TransportEvent::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Events produced by a live transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame arrived.
    Frame(String),
    /// The connection ended. `None` means it dropped without a close frame
    /// (treated as abnormal).
    Closed(Option<CloseInfo>),
}

/// One live bidirectional connection.
#[async_trait]
pub trait Transport: Send {
    /// Send a text frame. An error here marks the connection dead.
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Wait for the next inbound event. After `Closed` is returned the
    /// transport must not be polled again.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the connection. Idempotent, best effort.
    async fn close(&mut self);
}

/// Produces transports for a channel; the session reads the current
/// credential at every dial and passes it here.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    async fn connect(
        &self,
        channel: &ChannelSpec,
        token: Option<&str>,
    ) -> Result<Box<dyn Transport>>;
}

/// Reference-counted factory, the form the manager holds.
pub type ArcTransportFactory = std::sync::Arc<dyn TransportFactory>;

/// The session manager's own control frames, kept distinct from opaque
/// application payloads by the `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum ControlFrame {
    Ping { ts: u64 },
    Pong { ts: u64 },
}

/// Parse a frame as one of our control envelopes.
///
/// Anything that is not exactly a ping/pong envelope — including
/// application messages that happen to carry a `type` field — is `None`
/// and flows to subscribers untouched.
pub(crate) fn parse_control(text: &str) -> Option<ControlFrame> {
    serde_json::from_str::<ControlFrame>(text).ok()
}
