//! Zcret chat session controller
//!
//! Action-based session state machine: reacts to identity changes, drives the
//! transport connection, and keeps the message store and diagnostic log for
//! one chat session. No I/O happens here; a runtime (see `zcret-app`)
//! executes the returned [`SessionAction`]s.
//!
//! # Components
//!
//! - [`Session`]: The session controller
//! - [`Identity`]: Account status reported by the identity provider
//! - [`SessionError`]: Synchronous errors from session operations
//!
//! # Transports
//!
//! With the `transport` feature enabled, [`transport::NetworkTransport`]
//! provides the production WebSocket and long-poll transports.

pub mod error;
pub mod identity;
pub mod session;
#[cfg(feature = "transport")]
pub mod transport;

pub use error::{SessionError, ValidationError};
pub use identity::Identity;
pub use session::{Session, SessionAction, SessionConfig, SessionFailure, SessionState};
#[cfg(feature = "transport")]
pub use transport::{NetworkLink, NetworkTransport};
