//! Application runtime for the Zcret chat session
//!
//! Generic async runtime that executes the session controller's actions,
//! enabling deterministic simulation testing with the same code that runs in
//! production.
//!
//! # Components
//!
//! - [`Runtime`]: Single-task orchestration loop over one ordered inbox
//! - [`SessionHandle`]: Presentation-layer API (submit, queries, shutdown)
//! - [`SessionView`]: Watchable status snapshot
//! - [`SystemEnv`]: Production clock

mod env;
mod error;
mod handle;
mod runtime;

pub use env::SystemEnv;
pub use error::RuntimeError;
pub use handle::{AckReceiver, SessionHandle, SessionView};
pub use runtime::{Runtime, TICK_INTERVAL};
pub use zcret_client::{Identity, SessionConfig, SessionState};
