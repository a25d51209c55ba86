//! Wire format for the Zcret chat protocol.
//!
//! The chat server speaks Socket.IO v5 layered on Engine.IO v4. Engine.IO
//! owns the transport session (open handshake, heartbeat, close) and carries
//! opaque text messages; Socket.IO packets ride inside Engine.IO `message`
//! packets and carry named events with JSON arguments and optional
//! acknowledgement ids.
//!
//! ```text
//! ┌─────────── Engine.IO packet ───────────┐
//! │ '4' │ ┌────── Socket.IO packet ──────┐ │
//! │     │ │ '2' │ ack id │ [name, args…] │ │
//! │     │ └──────────────────────────────┘ │
//! └────────────────────────────────────────┘
//! ```
//!
//! Everything here is text in, text out. Transports decide how the text moves
//! (one WebSocket frame per packet, or `\x1e`-separated long-poll payloads).
//!
//! # Robustness
//!
//! Server payloads are untrusted: message ids may be missing and `error`
//! events may carry any JSON shape. Decoders never assume more structure than
//! the protocol guarantees.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod errors;
pub mod events;
pub mod packet;
pub mod payloads;

pub use engine::{EnginePacket, OpenHandshake};
pub use errors::{ProtocolError, Result};
pub use events::{Ack, ClientCommand, ServerEvent};
pub use packet::{Packet, PacketKind};
pub use payloads::{
    BatchEntry, ConnectErrorData, LoginRequest, LoginSuccess, MessageBatch, RejectedEntry,
    SendMessageRequest, ServerErrorPayload, WireMessage,
};
