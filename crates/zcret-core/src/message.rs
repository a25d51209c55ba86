//! Chat message types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use zcret_proto::WireMessage;

/// A stored chat message.
///
/// Immutable once stored; the store only ever replaces a message wholesale
/// when the same id arrives again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique within the store (server id or synthetic)
    pub id: String,
    /// Account identifier of the author
    pub sender: String,
    /// Message text
    pub content: String,
    /// Creation time, the store's sort key
    pub created_at: DateTime<Utc>,
}

/// A message as received, before the store assigns missing ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Server id, if the server sent one
    pub id: Option<String>,
    /// Account identifier of the author
    pub sender: String,
    /// Message text
    pub content: String,
    /// Parsed creation time
    pub created_at: DateTime<Utc>,
}

impl IncomingMessage {
    /// Convert the wire shape, parsing the timestamp.
    ///
    /// Timestamps that cannot be parsed sort as the Unix epoch.
    pub fn from_wire(wire: WireMessage) -> Self {
        let created_at = parse_timestamp(&wire.created_at).unwrap_or_else(|| {
            tracing::warn!(raw = %wire.created_at, "unparseable created_at, using epoch");
            DateTime::<Utc>::UNIX_EPOCH
        });
        Self { id: wire.id, sender: wire.sender, content: wire.content, created_at }
    }

    pub(crate) fn into_message(self, id: String) -> ChatMessage {
        ChatMessage { id, sender: self.sender, content: self.content, created_at: self.created_at }
    }
}

/// Parse ISO-8601 text, accepting offset-less forms as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-01-01T12:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn parses_offsetless_as_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 10:00:00.000"), Some(expected));
    }

    #[test]
    fn invalid_timestamp_falls_back_to_epoch() {
        let msg = IncomingMessage::from_wire(WireMessage {
            id: None,
            sender: "A".into(),
            content: "hi".into(),
            created_at: "yesterday".into(),
        });
        assert_eq!(msg.created_at, DateTime::<Utc>::UNIX_EPOCH);
    }
}
