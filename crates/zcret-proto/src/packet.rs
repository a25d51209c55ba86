//! Socket.IO v5 packets.
//!
//! A Socket.IO packet travels as the body of an Engine.IO `message` packet:
//!
//! ```text
//! <type>[<namespace>,][<ack id>][<JSON data>]
//! ```
//!
//! The default namespace `/` is omitted on the wire. Binary packet types need
//! attachment reassembly and are rejected.

use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Namespace every chat packet uses.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Socket.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Namespace connect request (client) or confirmation (server)
    Connect,
    /// Namespace disconnect
    Disconnect,
    /// Named event with arguments
    Event,
    /// Acknowledgement of an event carrying an ack id
    Ack,
    /// Namespace connection refused
    ConnectError,
}

impl PacketKind {
    /// Type digit on the wire.
    pub fn to_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
        }
    }

    /// Parse a type digit.
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            '0' => Ok(Self::Connect),
            '1' => Ok(Self::Disconnect),
            '2' => Ok(Self::Event),
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::ConnectError),
            '5' | '6' => Err(ProtocolError::BinaryUnsupported),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// A decoded Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet type
    pub kind: PacketKind,
    /// Namespace, `/` unless stated otherwise
    pub namespace: String,
    /// Acknowledgement id, present when the sender wants (or gives) an ack
    pub ack_id: Option<u64>,
    /// JSON body
    pub data: Option<Value>,
}

impl Packet {
    /// Packet on the default namespace.
    pub fn new(kind: PacketKind, ack_id: Option<u64>, data: Option<Value>) -> Self {
        Self { kind, namespace: DEFAULT_NAMESPACE.to_string(), ack_id, data }
    }

    /// Client request to join the default namespace.
    pub fn connect() -> Self {
        Self::new(PacketKind::Connect, None, None)
    }

    /// Encode to wire text (without the Engine.IO `4` prefix).
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.to_char());
        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Decode wire text (without the Engine.IO `4` prefix).
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = PacketKind::from_char(chars.next().ok_or(ProtocolError::Empty)?)?;
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            match rest.split_once(',') {
                Some((ns, tail)) => {
                    rest = tail;
                    ns.to_string()
                },
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                },
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            let (id, tail) = rest.split_at(digits);
            rest = tail;
            Some(id.parse::<u64>().map_err(|_| ProtocolError::InvalidAckId(id.to_string()))?)
        } else {
            None
        };

        let data = if rest.is_empty() { None } else { Some(serde_json::from_str(rest)?) };

        Ok(Self { kind, namespace, ack_id, data })
    }
}
