//! Error types for the connection layer.

use thiserror::Error;
use zcret_proto::ProtocolError;

use crate::connection::ConnectionState;

/// Errors from the transport connection state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Configuration cannot start a connection cycle
    #[error("transport init failed: {0}")]
    TransportInit(String),

    /// Send attempted while the link is not open
    #[error("not connected (state: {state:?})")]
    NotConnected {
        /// State the connection was in
        state: ConnectionState,
    },

    /// Outgoing command could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors from concrete transports while dialing or moving packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network or HTTP failure
    #[error("i/o error: {0}")]
    Io(String),

    /// The server did not complete the Engine.IO handshake
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The link was closed
    #[error("link closed")]
    Closed,

    /// This transport is not available here
    #[error("transport unavailable: {0}")]
    Unsupported(String),

    /// Received bytes were not valid protocol text
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
