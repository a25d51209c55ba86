//! Transport abstraction for the chat connection.
//!
//! A transport knows how to reach the server over one concrete mechanism
//! (WebSocket streaming or HTTP long-poll) and complete the Engine.IO open
//! handshake. Everything above the handshake (Socket.IO connect, heartbeat
//! replies, reconnection) belongs to [`crate::connection::Connection`].
//! Production uses `tokio-tungstenite` and `reqwest`, tests use an in-memory
//! simulated server.

use async_trait::async_trait;
use zcret_proto::{EnginePacket, OpenHandshake};

use crate::{connection::TransportKind, error::TransportError};

/// Dials links to the chat server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Established link type.
    type Link: TransportLink;

    /// Connect using `kind` and complete the Engine.IO handshake.
    ///
    /// `endpoint` is the server base URL (`https://host/`); the transport
    /// derives its own Engine.IO path and query from it.
    async fn dial(&self, kind: TransportKind, endpoint: &str) -> Result<Self::Link, TransportError>;
}

/// An established Engine.IO link.
#[async_trait]
pub trait TransportLink: Send + 'static {
    /// Handshake the server sent when the link opened.
    fn handshake(&self) -> &OpenHandshake;

    /// Send one packet.
    async fn send(&mut self, packet: EnginePacket) -> Result<(), TransportError>;

    /// Receive the next packet.
    ///
    /// Returns `None` once the link is closed. Must be cancel-safe: the
    /// runtime polls it inside `select!` alongside outgoing sends.
    async fn recv(&mut self) -> Option<Result<EnginePacket, TransportError>>;

    /// Close the link. Calling it more than once is harmless.
    async fn close(&mut self);
}
