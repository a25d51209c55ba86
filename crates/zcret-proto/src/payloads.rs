//! JSON payload shapes carried by chat events.
//!
//! Field names match the server's JSON exactly (`created_at`, `wallet`).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A chat message as the server sends it.
///
/// # Tolerated deviations
///
/// - `id` may be missing, `null`, empty, or numeric. Missing and empty ids
///   decode to `None`; numbers are kept as their decimal text.
/// - `created_at` is kept as raw text; parsing belongs to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server-assigned message id
    #[serde(default, deserialize_with = "deserialize_message_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Account identifier of the author
    pub sender: String,

    /// Message text
    pub content: String,

    /// ISO-8601 creation time
    pub created_at: String,
}

fn deserialize_message_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A history batch decoded entry by entry.
///
/// One malformed entry does not cost the rest of the batch: entries that
/// fail to decode are listed in `rejected` and the others are kept. Every
/// entry remembers its position in the batch as sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageBatch {
    /// Well-formed entries, in batch order
    pub entries: Vec<BatchEntry>,
    /// Entries that failed to decode
    pub rejected: Vec<RejectedEntry>,
}

/// A decoded batch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Position in the batch as sent
    pub index: usize,
    /// The message
    pub message: WireMessage,
}

/// A batch entry that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// Position in the batch as sent
    pub index: usize,
    /// Decoder error
    pub reason: String,
}

impl MessageBatch {
    /// Decode a JSON array, keeping every entry that parses.
    ///
    /// Returns `None` if `value` is not an array.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Array(items) = value else {
            return None;
        };
        let mut batch = Self::default();
        for (index, item) in items.iter().enumerate() {
            match WireMessage::deserialize(item) {
                Ok(message) => batch.entries.push(BatchEntry { index, message }),
                Err(e) => batch.rejected.push(RejectedEntry { index, reason: e.to_string() }),
            }
        }
        Some(batch)
    }

    /// The decoded messages, in batch order.
    pub fn messages(&self) -> impl Iterator<Item = &WireMessage> {
        self.entries.iter().map(|entry| &entry.message)
    }
}

impl From<Vec<WireMessage>> for MessageBatch {
    fn from(messages: Vec<WireMessage>) -> Self {
        let entries = messages
            .into_iter()
            .enumerate()
            .map(|(index, message)| BatchEntry { index, message })
            .collect();
        Self { entries, rejected: Vec::new() }
    }
}

/// `login` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account identifier to log in as
    pub wallet: String,
}

/// `send_message` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Account identifier of the author
    pub wallet: String,
    /// Message text, already trimmed
    pub content: String,
}

/// `login_success` event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSuccess {
    /// Account identifier the server accepted
    #[serde(default)]
    pub wallet: String,
}

/// Body of a server `error` event.
///
/// The server gives no schema for errors, so anything that is not a plain
/// string or an object with a string `message` is kept as its JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorPayload {
    /// Error with a readable message
    Known {
        /// Human-readable error text
        message: String,
    },
    /// Any other JSON value, stringified
    Opaque(String),
}

impl ServerErrorPayload {
    /// Classify an arbitrary JSON value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::Known { message: message.clone() },
            Value::Object(map) => match map.get("message") {
                Some(Value::String(message)) => Self::Known { message: message.clone() },
                _ => Self::Opaque(value.to_string()),
            },
            other => Self::Opaque(other.to_string()),
        }
    }
}

impl fmt::Display for ServerErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known { message } => f.write_str(message),
            Self::Opaque(text) => f.write_str(text),
        }
    }
}

/// Body of a Socket.IO `CONNECT_ERROR` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectErrorData {
    /// Reason the namespace refused the connection
    pub message: String,
}

impl ConnectErrorData {
    /// Extract a reason from whatever the server sent.
    pub fn from_value(value: Option<&Value>) -> Self {
        let message = match value {
            None => "connection refused".to_string(),
            Some(value) => ServerErrorPayload::from_value(value).to_string(),
        };
        Self { message }
    }
}
