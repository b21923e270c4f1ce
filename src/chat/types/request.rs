use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::Result;
use crate::chat::queue::OutboundItem;
use crate::session::Session;

/// Frames the client writes to the chat server, tagged by `type`.
///
/// # Security
///
/// When serialized, [`OutboundFrame::Validate`] exposes the session token in
/// plaintext. Only send it over `wss://` and never log the encoded frame.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// First frame on every new connection
    Validate {
        user_id: String,
        #[serde(serialize_with = "expose_token")]
        token: SecretString,
    },
    /// One chat message
    Chat {
        message: String,
        message_id: Uuid,
        chat_id: String,
        at: DateTime<Utc>,
    },
    /// Membership request for one or more chats
    Join { chat_id: Vec<String> },
}

impl OutboundFrame {
    #[must_use]
    pub fn validate(session: &Session) -> Self {
        Self::Validate {
            user_id: session.user_id.clone(),
            token: session.token.clone(),
        }
    }

    #[must_use]
    pub fn chat(item: &OutboundItem) -> Self {
        Self::Chat {
            message: item.message.clone(),
            message_id: item.message_id,
            chat_id: item.chat_id.clone(),
            at: item.enqueued_at,
        }
    }

    #[must_use]
    pub fn join(chat_ids: Vec<String>) -> Self {
        Self::Join { chat_id: chat_ids }
    }

    /// Encode as the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn expose_token<S: Serializer>(
    token: &SecretString,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(token.expose_secret())
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn encode(frame: &OutboundFrame) -> Value {
        serde_json::from_str(&frame.to_json().unwrap()).unwrap()
    }

    #[test]
    fn validate_frame_carries_user_and_token() {
        let session = Session::new("u1".to_owned(), "t1".to_owned(), "wss://x".to_owned()).unwrap();

        assert_eq!(
            encode(&OutboundFrame::validate(&session)),
            json!({ "type": "Validate", "user_id": "u1", "token": "t1" })
        );
    }

    #[test]
    fn chat_frame_uses_item_identity() {
        let item = OutboundItem::new("hi".to_owned(), "c1".to_owned());
        let value = encode(&OutboundFrame::chat(&item));

        assert_eq!(value["type"], "Chat");
        assert_eq!(value["message"], "hi");
        assert_eq!(value["chat_id"], "c1");
        assert_eq!(value["message_id"], item.message_id.to_string());
        let at: DateTime<Utc> = serde_json::from_value(value["at"].clone()).unwrap();
        assert_eq!(at, item.enqueued_at);
    }

    #[test]
    fn join_frame_lists_all_chats() {
        let frame = OutboundFrame::join(vec!["c1".to_owned(), "c2".to_owned()]);

        assert_eq!(
            encode(&frame),
            json!({ "type": "Join", "chat_id": ["c1", "c2"] })
        );
    }
}
