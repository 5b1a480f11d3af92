//! Chat envelope carried inside text frames
//!
//! `{"user": string, "text": string, "time": RFC3339 string}`. The time
//! is always stamped by the server; whatever the client sends is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// A chat message as broadcast to every session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: String,
    pub text: String,
    #[serde(with = "rfc3339_seconds")]
    pub time: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current server time
    pub fn now(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            text: text.into(),
            time: Utc::now(),
        }
    }

    /// Serialize for a text frame
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a message received from the server, keeping its time
    pub fn from_payload(payload: &str) -> Result<Self, FormatError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Client → server envelope; a client-supplied `time` is accepted and dropped
#[derive(Debug, Deserialize)]
struct Inbound {
    user: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct InboundText {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Join {
    #[serde(default)]
    user: String,
}

#[derive(Debug, Serialize)]
struct Outbound<'a> {
    user: &'a str,
    text: &'a str,
}

/// Parse a full envelope; `user` and `text` are both required
pub fn parse(payload: &str) -> Result<ChatMessage, FormatError> {
    let Inbound { user, text } = serde_json::from_str(payload)?;
    Ok(ChatMessage::now(user, text))
}

/// Parse an envelope from a session that already declared `user`
///
/// Only `text` is required; any `user` field is overwritten.
pub fn parse_for(user: &str, payload: &str) -> Result<ChatMessage, FormatError> {
    let InboundText { text } = serde_json::from_str(payload)?;
    Ok(ChatMessage::now(user, text))
}

/// Parse the join message that opens an advanced-mode session
///
/// Returns the trimmed username, which must not be empty.
pub fn parse_join(payload: &str) -> Result<String, FormatError> {
    let Join { user } = serde_json::from_str(payload)?;
    let user = user.trim();
    if user.is_empty() {
        return Err(FormatError::EmptyUsername);
    }
    Ok(user.to_string())
}

/// Stamp `now()` and serialize
pub fn format(user: &str, text: &str) -> Result<String, FormatError> {
    ChatMessage::now(user, text)
        .to_payload()
        .map_err(FormatError::from)
}

/// Envelope a client sends; the server fills in the time
pub fn request(user: &str, text: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Outbound { user, text })
}

mod rfc3339_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|time| time.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overwrites_client_time() {
        let before = Utc::now() - chrono::Duration::seconds(1);
        let msg = parse(r#"{"user": "Ana", "text": "hola", "time": "1999-01-01T00:00:00Z"}"#)
            .unwrap();
        assert_eq!(msg.user, "Ana");
        assert_eq!(msg.text, "hola");
        assert!(msg.time >= before);
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        assert!(matches!(
            parse("{not json"),
            Err(FormatError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_parse_requires_user_and_text() {
        assert!(matches!(
            parse(r#"{"text": "anonymous"}"#),
            Err(FormatError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            parse(r#"{"user": "Ana"}"#),
            Err(FormatError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_parse_for_ignores_claimed_user() {
        let msg = parse_for("Ana", r#"{"user": "Mallory", "text": "hi"}"#).unwrap();
        assert_eq!(msg.user, "Ana");
        assert_eq!(msg.text, "hi");
    }

    #[test]
    fn test_parse_join() {
        assert_eq!(parse_join(r#"{"user": " Ana ", "text": ""}"#).unwrap(), "Ana");
        assert!(matches!(
            parse_join(r#"{"user": "   "}"#),
            Err(FormatError::EmptyUsername)
        ));
        assert!(matches!(
            parse_join(r#"{"text": "no name"}"#),
            Err(FormatError::EmptyUsername)
        ));
        assert!(matches!(
            parse_join("Ana"),
            Err(FormatError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_format_uses_rfc3339_seconds() {
        let payload = format("Ana", "hi").unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["user"], "Ana");
        assert_eq!(value["text"], "hi");

        let time = value["time"].as_str().unwrap();
        assert!(time.ends_with('Z'));
        assert_eq!(time.len(), "2026-01-01T00:00:00Z".len());
        assert!(DateTime::parse_from_rfc3339(time).is_ok());
    }

    #[test]
    fn test_from_payload_keeps_server_time() {
        let msg = ChatMessage::from_payload(
            r#"{"user": "Ana", "text": "hi", "time": "2025-06-22T10:01:00Z"}"#,
        )
        .unwrap();
        assert_eq!(msg.time.to_rfc3339(), "2025-06-22T10:01:00+00:00");
    }

    #[test]
    fn test_request_has_no_time() {
        let payload = request("Ana", "hi").unwrap();
        assert_eq!(payload, r#"{"user":"Ana","text":"hi"}"#);
    }
}
