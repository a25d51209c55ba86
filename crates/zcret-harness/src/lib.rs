//! Deterministic simulation harness for Zcret session testing.
//!
//! In-memory implementations of the Environment and Transport traits, a
//! scripted Socket.IO server, and a synchronous scenario runner, so the
//! session can be exercised end to end without sockets or wall-clock time.
//!
//! Two ways to drive a session:
//!
//! - [`scenario`]: synchronous. A [`scenario::World`] executes session
//!   actions directly against a [`SimServer`]; retry delays elapse
//!   instantly. Best for protocol-level assertions.
//! - [`SimTransport`]: asynchronous. Plugs into the real runtime under a
//!   paused tokio clock, so timers and task interleavings are exercised too.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod scenario;
pub mod sim_env;
pub mod sim_server;
pub mod sim_transport;

pub use model::{ModelMessage, StoreModel, StoreOperation};
pub use sim_env::SimEnv;
pub use sim_server::{SharedSimServer, SimServer, create_shared_server, lock_server};
pub use sim_transport::{SimLink, SimTransport};
