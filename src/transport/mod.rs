//! Transport layer abstraction
//!
//! This module provides the duplex, auto-reconnecting relay channel:
//! - `protocol`: the named events and commands exchanged with the relay
//! - `memory`: an in-process transport wired to a [`RelayHub`](crate::relay::RelayHub)
//! - `websocket`: a WebSocket client that reconnects with backoff
//!
//! # Design
//!
//! A transport only moves relay frames and reports its own connection state.
//! Encryption and the handshake live in the session layer.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod protocol;
pub mod websocket;

pub use memory::{MemoryLink, MemoryTransport};
pub use protocol::{EventKind, RelayCommand, RelayEvent};
pub use websocket::WebSocketTransport;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Command attempted while the channel is down
    #[error("Not connected")]
    NotConnected,

    /// Transport was closed and will not reconnect
    #[error("Transport closed")]
    Closed,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Connection states a transport moves through
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or closed
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Frames can flow
    Connected,
    /// Lost the connection and retrying
    Reconnecting,
}

/// Something that happened on the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSignal {
    /// The connection state changed
    State(ConnectionState),
    /// The relay pushed an event
    Event(RelayEvent),
}

/// Abstract relay transport
///
/// Implementations reconnect on their own after a drop and report every
/// transition through [`recv`](RelayTransport::recv).
#[async_trait]
pub trait RelayTransport: Send {
    /// Begin connecting
    async fn start(&mut self) -> TransportResult<()>;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Send a command; fails with [`TransportError::NotConnected`] unless connected
    async fn send(&mut self, command: RelayCommand) -> TransportResult<()>;

    /// Wait for the next state change or event
    ///
    /// Returns [`TransportError::Closed`] once the transport is closed.
    async fn recv(&mut self) -> TransportResult<TransportSignal>;

    /// Close the transport for good
    async fn close(&mut self) -> TransportResult<()>;

    /// Whether commands can be sent right now
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}
