//! Engine.IO v4 packets.
//!
//! Engine.IO is the transport session underneath Socket.IO. Every packet is a
//! single type digit followed by an optional text body:
//!
//! | digit | packet    | body                         |
//! |-------|-----------|------------------------------|
//! | `0`   | open      | JSON [`OpenHandshake`]       |
//! | `1`   | close     | none                         |
//! | `2`   | ping      | optional probe text          |
//! | `3`   | pong      | optional probe text          |
//! | `4`   | message   | Socket.IO packet text        |
//! | `5`   | upgrade   | none                         |
//! | `6`   | noop      | none                         |
//!
//! Long-poll transports batch several packets into one HTTP body separated by
//! [`RECORD_SEPARATOR`].

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Separator between packets in a long-poll payload.
pub const RECORD_SEPARATOR: char = '\x1e';

/// Engine.IO protocol revision spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 4;

/// Handshake data carried by the server's `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id, required for long-poll requests
    pub sid: String,

    /// Transports the server allows upgrading to
    #[serde(default)]
    pub upgrades: Vec<String>,

    /// Milliseconds between server pings
    pub ping_interval: u64,

    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,

    /// Largest payload the server accepts, in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// A single Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// Session opened by the server
    Open(OpenHandshake),
    /// Transport closing
    Close,
    /// Heartbeat probe (server to client in v4)
    Ping(String),
    /// Heartbeat reply
    Pong(String),
    /// Application data, a Socket.IO packet
    Message(String),
    /// Transport upgrade completed
    Upgrade,
    /// No operation, used to flush pending polls
    Noop,
}

impl EnginePacket {
    /// Type digit of this packet.
    pub fn type_char(&self) -> char {
        match self {
            Self::Open(_) => '0',
            Self::Close => '1',
            Self::Ping(_) => '2',
            Self::Pong(_) => '3',
            Self::Message(_) => '4',
            Self::Upgrade => '5',
            Self::Noop => '6',
        }
    }

    /// Encode to wire text.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.type_char());
        match self {
            Self::Open(handshake) => {
                let mut body = serde_json::json!({
                    "sid": handshake.sid,
                    "upgrades": handshake.upgrades,
                    "pingInterval": handshake.ping_interval,
                    "pingTimeout": handshake.ping_timeout,
                });
                if let (Some(max), Some(obj)) = (handshake.max_payload, body.as_object_mut()) {
                    obj.insert("maxPayload".into(), max.into());
                }
                out.push_str(&body.to_string());
            },
            Self::Ping(data) | Self::Pong(data) | Self::Message(data) => out.push_str(data),
            Self::Close | Self::Upgrade | Self::Noop => {},
        }
        out
    }

    /// Decode one packet from wire text.
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let body = chars.as_str();

        match kind {
            '0' => {
                let handshake: OpenHandshake = serde_json::from_str(body)?;
                Ok(Self::Open(handshake))
            },
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ProtocolError::UnknownEngineType(other)),
        }
    }
}

/// Join packets into a long-poll request body.
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    let mut out = String::new();
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&packet.encode());
    }
    out
}

/// Split a long-poll response body into packets.
///
/// An empty body decodes to no packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(RECORD_SEPARATOR).map(EnginePacket::decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_open_handshake() {
        let text = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let packet = EnginePacket::decode(text).unwrap();

        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open packet, got {packet:?}");
        };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(handshake.upgrades, vec!["websocket".to_string()]);
        assert_eq!(handshake.ping_interval, 25_000);
        assert_eq!(handshake.ping_timeout, 20_000);
        assert_eq!(handshake.max_payload, Some(1_000_000));
    }

    #[test]
    fn open_roundtrip_preserves_handshake() {
        let handshake = OpenHandshake {
            sid: "abc".into(),
            upgrades: vec![],
            ping_interval: 100,
            ping_timeout: 50,
            max_payload: None,
        };
        let text = EnginePacket::Open(handshake.clone()).encode();
        assert_eq!(EnginePacket::decode(&text).unwrap(), EnginePacket::Open(handshake));
    }

    #[test]
    fn decode_heartbeat_with_probe() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::decode("3probe").unwrap(), EnginePacket::Pong("probe".into()));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert_eq!(EnginePacket::decode("9"), Err(ProtocolError::UnknownEngineType('9')));
        assert_eq!(EnginePacket::decode(""), Err(ProtocolError::Empty));
    }

    #[test]
    fn decode_rejects_malformed_open() {
        assert!(matches!(EnginePacket::decode("0{not json"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn payload_joins_with_record_separator() {
        let body = encode_payload(&[
            EnginePacket::Message("40".into()),
            EnginePacket::Message(r#"42["fetch_messages"]"#.into()),
            EnginePacket::Pong(String::new()),
        ]);
        insta::assert_snapshot!(body.replace(RECORD_SEPARATOR, "|"), @r#"440|442["fetch_messages"]|3"#);
    }

    #[test]
    fn payload_splits_into_packets() {
        let body = format!("2{RECORD_SEPARATOR}440{RECORD_SEPARATOR}6");
        let packets = decode_payload(&body).unwrap();
        assert_eq!(packets, vec![
            EnginePacket::Ping(String::new()),
            EnginePacket::Message("40".into()),
            EnginePacket::Noop,
        ]);
        assert!(decode_payload("").unwrap().is_empty());
    }
}
