//! Runtime errors seen by the presentation layer.

use thiserror::Error;
use zcret_client::SessionError;

/// Errors from [`crate::SessionHandle`] calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime has shut down
    #[error("session runtime stopped")]
    Stopped,

    /// The session rejected the request
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The acknowledgement will never arrive (link dropped or session closed)
    #[error("acknowledgement {id} released without reply")]
    AckReleased {
        /// Ack id that was waited on
        id: u64,
    },
}
