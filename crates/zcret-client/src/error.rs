//! Error types for the session controller.

use thiserror::Error;
use zcret_core::ConnectionError;

use crate::session::SessionState;

/// Outgoing text rejected before reaching the wire.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Message is empty after trimming
    #[error("message is empty")]
    EmptyMessage,

    /// No account identity is connected
    #[error("no identity connected")]
    MissingIdentity,
}

/// Errors returned synchronously by [`crate::Session`] operations.
///
/// Transport failures are not reported here; they arrive as session state
/// and diagnostic entries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Input failed validation
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// Session cannot send in its current state
    #[error("not connected (session state: {state})")]
    NotConnected {
        /// State the session was in
        state: SessionState,
    },

    /// Connection layer rejected the operation
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
