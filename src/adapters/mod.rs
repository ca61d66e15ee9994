//! Adapter interfaces for the backend session channel.
//!
//! The channel owns the single logical connection to the investigation
//! backend. It turns pushed messages into `ChannelEvent`s and carries the
//! one outbound action, starting an investigation.

pub mod channel;
pub mod socketio;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{InvestigationRequest, Notification};

// Re-export the Socket.IO channel
pub use channel::{probe, ChannelSettings, SocketIoChannel};

/// Events surfaced by a channel, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel (re)connected and can carry a start request
    Connected,

    /// The connection dropped; the channel will retry on its own
    Disconnected { reason: String },

    /// A backend notification
    Notification(Notification),
}

/// Transport and wire errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported packet: {0}")]
    Unsupported(String),

    #[error("connection refused by server: {0}")]
    Rejected(String),

    #[error("channel closed")]
    Closed,
}

/// Trait for session channels
#[async_trait]
pub trait SessionChannel: Send {
    /// Whether a start request would currently be delivered
    fn is_connected(&self) -> bool;

    /// Send one `investigate` message.
    ///
    /// Returns `Ok(false)` without sending when the channel is not connected.
    async fn start_investigation(
        &mut self,
        request: &InvestigationRequest,
    ) -> Result<bool, ChannelError>;

    /// Close the connection and stop reconnecting
    async fn disconnect(&mut self);
}
