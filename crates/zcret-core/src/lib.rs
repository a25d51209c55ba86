//! Zcret session core logic
//!
//! Pure state machine logic for the chat session, decoupled from I/O so it
//! can be driven identically by the production runtime and by deterministic
//! simulations.
//!
//! # Architecture
//!
//! State machines here never touch sockets, timers, or clocks. Time is passed
//! in by the caller, and transitions return declarative actions (dial this
//! transport, send this packet, arm this timer) that a runtime executes. Link
//! results come back in as plain method calls tagged with the connection
//! cycle that requested them, so late results from an abandoned cycle are
//! recognised and dropped.
//!
//! # Components
//!
//! - [`connection`]: Transport connection state machine (dial, transport
//!   fallback, bounded reconnection, heartbeat, event demultiplexing)
//! - [`store`]: Ordered, deduplicated message store
//! - [`diagnostics`]: Bounded, timestamped diagnostic trace
//! - [`message`]: Chat message types
//! - [`mod@env`]: Environment abstraction (monotonic and wall-clock time)
//! - [`transport`]: Transport abstraction (dial, link send/recv)
//! - [`error`]: Error types

pub mod connection;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod message;
pub mod store;
pub mod transport;

pub use connection::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, DisconnectReason,
    TransportEvent, TransportKind,
};
pub use diagnostics::{DiagnosticEntry, DiagnosticLog};
pub use env::Environment;
pub use error::{ConnectionError, TransportError};
pub use message::{ChatMessage, IncomingMessage};
pub use store::{MessageStore, StoreConfig, batch_message_id};
pub use transport::{Transport, TransportLink};
