//! WebSocket module for the Bitfinex socket session
//!
//! The connector talks to the socket only through [`Transport`]: it sends text
//! frames and receives [`SessionEvent`]s on a channel. Reconnects and keepalive
//! are the transport's business.

mod client;
mod transport;

pub use client::WebSocketClient;
pub use transport::{TransportConfig, WebSocketTransport};

use tokio::sync::mpsc;

use crate::error::Result;

/// Something the socket session reports to the connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A text frame, in arrival order
    Message(String),
    /// The session was re-established; the exchange has forgotten all channels
    Reconnected,
}

/// Outbound side of the socket session
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync + 'static {
    /// Begin the session. Inbound frames are delivered on `events`.
    fn start(&self, events: mpsc::UnboundedSender<SessionEvent>) -> Result<()>;

    /// Queue a text frame for sending
    fn send(&self, frame: String) -> Result<()>;
}
