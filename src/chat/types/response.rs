use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use serde_with::serde_as;

use crate::Result;
use crate::serde_helpers::{StringFromAny, deserialize_with_warnings};
use crate::ws::WsError;

/// What an inbound frame announces.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A chat message. Frames without a `type` are treated as chat messages.
    Chat,
    /// The server's acknowledgement of the Validate frame
    Validate,
}

impl EventKind {
    fn from_tag(tag: Option<&str>) -> Option<Self> {
        match tag {
            None | Some("Chat") => Some(Self::Chat),
            Some("Validate") => Some(Self::Validate),
            Some(_) => None,
        }
    }
}

/// A decoded, validated frame from the chat server.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub chat_id: String,
    pub message_id: String,
    pub user_id: Option<String>,
    pub message: Option<String>,
    pub at: Option<DateTime<Utc>>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
}

/// Wire shape before the mandatory fields are checked.
#[serde_as]
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    chat_id: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    message_id: Option<String>,
    #[serde_as(as = "Option<StringFromAny>")]
    user_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    at: Option<Value>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// Parse one raw text frame into an [`InboundEvent`].
///
/// Rejects frames that are not JSON objects, that lack a non-empty `chat_id`
/// or `message_id`, or whose `type` is not one this client understands.
pub fn parse_frame(bytes: &[u8]) -> Result<InboundEvent> {
    let value: Value = serde_json::from_slice(bytes).map_err(WsError::MessageParse)?;
    if !value.is_object() {
        return Err(WsError::InvalidMessage("frame is not a JSON object".to_owned()).into());
    }

    let raw: RawFrame = deserialize_with_warnings(value)?;

    let kind = EventKind::from_tag(raw.kind.as_deref()).ok_or_else(|| {
        WsError::InvalidMessage(format!(
            "unknown frame type {:?}",
            raw.kind.as_deref().unwrap_or_default()
        ))
    })?;
    let chat_id = required(raw.chat_id, "chat_id")?;
    let message_id = required(raw.message_id, "message_id")?;

    Ok(InboundEvent {
        kind,
        chat_id,
        message_id,
        user_id: raw.user_id,
        message: raw.message,
        at: raw.at.as_ref().and_then(parse_timestamp),
        nickname: raw.nickname,
        avatar_url: raw.avatar_url,
    })
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    field
        .filter(|value| !value.is_empty())
        .ok_or_else(|| WsError::InvalidMessage(format!("missing {name}")).into())
}

/// `at` arrives either as an RFC 3339 string or as epoch milliseconds. An
/// unreadable timestamp is dropped rather than failing the whole frame.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        Value::Number(millis) => DateTime::from_timestamp_millis(millis.as_i64()?),
        _ => None,
    }
}
