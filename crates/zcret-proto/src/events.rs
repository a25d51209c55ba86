//! Typed chat events on top of Socket.IO `EVENT` and `ACK` packets.
//!
//! An event packet's data is a JSON array whose first element is the event
//! name and whose remaining elements are the arguments.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    errors::{ProtocolError, Result},
    packet::{Packet, PacketKind},
    payloads::{
        LoginRequest, LoginSuccess, MessageBatch, SendMessageRequest, ServerErrorPayload,
        WireMessage,
    },
};

/// Event names used on the wire.
pub mod names {
    /// Client login
    pub const LOGIN: &str = "login";
    /// Client history request
    pub const FETCH_MESSAGES: &str = "fetch_messages";
    /// Client outgoing chat text
    pub const SEND_MESSAGE: &str = "send_message";
    /// Server history batch
    pub const MESSAGES: &str = "messages";
    /// Server incremental push
    pub const NEW_MESSAGE: &str = "new_message";
    /// Server login confirmation
    pub const LOGIN_SUCCESS: &str = "login_success";
    /// Server error report
    pub const ERROR: &str = "error";
}

/// Commands the client emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Authenticate with an account identifier
    Login(LoginRequest),
    /// Ask for message history
    FetchMessages,
    /// Post a chat message
    SendMessage(SendMessageRequest),
}

impl ClientCommand {
    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => names::LOGIN,
            Self::FetchMessages => names::FETCH_MESSAGES,
            Self::SendMessage(_) => names::SEND_MESSAGE,
        }
    }

    /// Build the `EVENT` packet, optionally requesting an acknowledgement.
    pub fn to_packet(&self, ack_id: Option<u64>) -> Result<Packet> {
        let data = match self {
            Self::Login(req) => event_array(self.name(), Some(serde_json::to_value(req)?)),
            Self::FetchMessages => event_array(self.name(), None),
            Self::SendMessage(req) => event_array(self.name(), Some(serde_json::to_value(req)?)),
        };
        Ok(Packet::new(PacketKind::Event, ack_id, Some(data)))
    }

    /// Parse a client `EVENT` packet (server side of the wire).
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let (name, args) = split_event(packet)?;
        match name.as_str() {
            names::LOGIN => Ok(Self::Login(first_arg(names::LOGIN, &args)?)),
            names::FETCH_MESSAGES => Ok(Self::FetchMessages),
            names::SEND_MESSAGE => Ok(Self::SendMessage(first_arg(names::SEND_MESSAGE, &args)?)),
            _ => Err(ProtocolError::UnexpectedPayload {
                context: "client event",
                reason: format!("unknown event {name:?}"),
            }),
        }
    }
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Full history batch
    Messages(MessageBatch),
    /// One message pushed live
    NewMessage(WireMessage),
    /// Login accepted
    LoginSuccess(LoginSuccess),
    /// Error report of unknown shape
    Error(ServerErrorPayload),
    /// Event this client does not handle
    Unknown {
        /// Event name as sent
        name: String,
    },
}

impl ServerEvent {
    /// Parse a server `EVENT` packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let (name, args) = split_event(packet)?;
        match name.as_str() {
            names::MESSAGES => {
                let value = args.first().unwrap_or(&Value::Null);
                MessageBatch::from_value(value).map(Self::Messages).ok_or_else(|| {
                    ProtocolError::UnexpectedPayload {
                        context: names::MESSAGES,
                        reason: "history is not an array".into(),
                    }
                })
            },
            names::NEW_MESSAGE => Ok(Self::NewMessage(first_arg(names::NEW_MESSAGE, &args)?)),
            names::LOGIN_SUCCESS => {
                Ok(Self::LoginSuccess(first_arg(names::LOGIN_SUCCESS, &args)?))
            },
            names::ERROR => {
                let payload = args.first().unwrap_or(&Value::Null);
                Ok(Self::Error(ServerErrorPayload::from_value(payload)))
            },
            _ => Ok(Self::Unknown { name }),
        }
    }

    /// Build the `EVENT` packet (server side of the wire).
    pub fn to_packet(&self) -> Result<Packet> {
        let data = match self {
            Self::Messages(batch) => {
                let messages: Vec<&WireMessage> = batch.messages().collect();
                event_array(names::MESSAGES, Some(serde_json::to_value(messages)?))
            },
            Self::NewMessage(msg) => {
                event_array(names::NEW_MESSAGE, Some(serde_json::to_value(msg)?))
            },
            Self::LoginSuccess(ok) => {
                event_array(names::LOGIN_SUCCESS, Some(serde_json::to_value(ok)?))
            },
            Self::Error(ServerErrorPayload::Known { message }) => {
                event_array(names::ERROR, Some(serde_json::json!({ "message": message })))
            },
            Self::Error(ServerErrorPayload::Opaque(text)) => {
                let value = serde_json::from_str(text).unwrap_or(Value::String(text.clone()));
                event_array(names::ERROR, Some(value))
            },
            Self::Unknown { name } => event_array(name, None),
        };
        Ok(Packet::new(PacketKind::Event, None, Some(data)))
    }
}

/// Reply to an event that carried an ack id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Id of the acknowledged event
    pub id: u64,
    /// Reply arguments
    pub args: Vec<Value>,
}

impl Ack {
    /// Parse an `ACK` packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.kind != PacketKind::Ack {
            return Err(ProtocolError::UnexpectedPayload {
                context: "ack",
                reason: format!("packet kind {:?}", packet.kind),
            });
        }
        let id = packet.ack_id.ok_or_else(|| ProtocolError::UnexpectedPayload {
            context: "ack",
            reason: "missing ack id".into(),
        })?;
        let args = match &packet.data {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };
        Ok(Self { id, args })
    }

    /// Build the `ACK` packet.
    pub fn to_packet(&self) -> Packet {
        Packet::new(PacketKind::Ack, Some(self.id), Some(Value::Array(self.args.clone())))
    }
}

fn event_array(name: &str, arg: Option<Value>) -> Value {
    let mut items = vec![Value::String(name.to_string())];
    items.extend(arg);
    Value::Array(items)
}

fn split_event(packet: &Packet) -> Result<(String, Vec<Value>)> {
    if packet.kind != PacketKind::Event {
        return Err(ProtocolError::UnexpectedPayload {
            context: "event",
            reason: format!("packet kind {:?}", packet.kind),
        });
    }
    let Some(Value::Array(items)) = &packet.data else {
        return Err(ProtocolError::UnexpectedPayload {
            context: "event",
            reason: "data is not an array".into(),
        });
    };
    let mut items = items.iter();
    let Some(Value::String(name)) = items.next() else {
        return Err(ProtocolError::UnexpectedPayload {
            context: "event",
            reason: "missing event name".into(),
        });
    };
    Ok((name.clone(), items.cloned().collect()))
}

fn first_arg<T: DeserializeOwned>(context: &'static str, args: &[Value]) -> Result<T> {
    let value = args.first().ok_or_else(|| ProtocolError::UnexpectedPayload {
        context,
        reason: "missing argument".into(),
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| ProtocolError::UnexpectedPayload { context, reason: e.to_string() })
}
