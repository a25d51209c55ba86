//! Protocol error types.

use thiserror::Error;

/// Result alias for wire decoding and encoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding or encoding wire data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before a packet type could be read
    #[error("empty packet")]
    Empty,

    /// Engine.IO packet type digit is not defined by protocol v4
    #[error("unknown engine.io packet type: {0:?}")]
    UnknownEngineType(char),

    /// Socket.IO packet type digit is not defined by protocol v5
    #[error("unknown socket.io packet type: {0:?}")]
    UnknownPacketType(char),

    /// Binary packets need attachment reassembly we do not implement
    #[error("binary socket.io packets are not supported")]
    BinaryUnsupported,

    /// Acknowledgement id did not fit in a u64
    #[error("invalid ack id: {0}")]
    InvalidAckId(String),

    /// JSON body was not valid
    #[error("invalid json: {0}")]
    Json(String),

    /// JSON was valid but did not have the expected shape
    #[error("unexpected payload for {context}: {reason}")]
    UnexpectedPayload {
        /// What was being decoded
        context: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
