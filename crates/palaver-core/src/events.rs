//! Wire protocol: text frames, one JSON object per frame, discriminated
//! by a required `type` field. Unknown fields are ignored.

use serde::{Deserialize, Serialize};

use crate::identity::ParticipantRole;
use crate::ids::{ConversationId, MessageId};
use crate::presence::PresenceStatus;

/// Inbound event payloads, one struct per event kind.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthPayload {
    pub participant_type: ParticipantRole,
    pub participant_id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessagePayload {
    pub conversation_id: ConversationId,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    /// Opaque client correlation token, echoed back in `message_sent`.
    #[serde(default)]
    pub temp_id: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubscribePayload {
    pub conversation_id: ConversationId,
}

/// A parsed inbound event.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    Auth(AuthPayload),
    Message(MessagePayload),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    SubscribeConversation(SubscribePayload),
    Ping,
}

/// Why an inbound frame could not be turned into a [`ClientEvent`].
/// Unknown event kinds are distinguished from malformed payloads because
/// the protocol answers them differently.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl ClientEvent {
    /// Parse one text frame. The `type` discriminator is resolved first so
    /// that an unrecognized kind is reported as such even when the rest of
    /// the payload would not deserialize.
    pub fn parse(raw: &str) -> Result<Self, EventParseError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| EventParseError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| EventParseError::Malformed("missing \"type\" field".into()))?
            .to_owned();

        fn payload<T: serde::de::DeserializeOwned>(
            value: serde_json::Value,
        ) -> Result<T, EventParseError> {
            serde_json::from_value(value).map_err(|e| EventParseError::Malformed(e.to_string()))
        }

        match kind.as_str() {
            "auth" => Ok(Self::Auth(payload(value)?)),
            "message" => Ok(Self::Message(payload(value)?)),
            "typing_start" => Ok(Self::TypingStart(payload(value)?)),
            "typing_stop" => Ok(Self::TypingStop(payload(value)?)),
            "subscribe_conversation" => Ok(Self::SubscribeConversation(payload(value)?)),
            "ping" => Ok(Self::Ping),
            _ => Err(EventParseError::UnknownType(kind)),
        }
    }
}

/// Outbound events. Serialized once per broadcast and shared across
/// recipients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AuthSuccess {
        user_id: String,
        conversations: Vec<ConversationId>,
    },
    Error {
        message: String,
    },
    NewMessage {
        message_id: MessageId,
        conversation_id: ConversationId,
        sender_type: ParticipantRole,
        sender_id: i64,
        sender_name: String,
        content: String,
        reply_to_id: Option<MessageId>,
        created_at: String,
    },
    MessageSent {
        message_id: MessageId,
        temp_id: Option<serde_json::Value>,
    },
    UserTyping {
        conversation_id: ConversationId,
        user_id: String,
        participant_type: ParticipantRole,
        participant_id: i64,
        is_typing: bool,
    },
    StatusChange {
        user_id: String,
        participant_type: ParticipantRole,
        participant_id: i64,
        status: PresenceStatus,
        timestamp: String,
    },
    Subscribed {
        conversation_id: ConversationId,
    },
    Pong,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth() {
        let event = ClientEvent::parse(r#"{"type":"auth","participant_type":"user","participant_id":7}"#).unwrap();
        match event {
            ClientEvent::Auth(p) => {
                assert_eq!(p.participant_type, ParticipantRole::User);
                assert_eq!(p.participant_id, 7);
            }
            other => panic!("expected auth, got {other:?}"),
        }
    }

    #[test]
    fn parse_message_with_optional_fields() {
        let event = ClientEvent::parse(
            r#"{"type":"message","conversation_id":42,"content":"hello","reply_to_id":9,"temp_id":"tmp-1"}"#,
        )
        .unwrap();
        match event {
            ClientEvent::Message(p) => {
                assert_eq!(p.conversation_id, ConversationId::from_raw(42));
                assert_eq!(p.content, "hello");
                assert_eq!(p.reply_to_id, Some(MessageId::from_raw(9)));
                assert_eq!(p.temp_id, Some(serde_json::json!("tmp-1")));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn parse_message_without_optional_fields() {
        let event =
            ClientEvent::parse(r#"{"type":"message","conversation_id":42,"content":"hi"}"#).unwrap();
        match event {
            ClientEvent::Message(p) => {
                assert!(p.reply_to_id.is_none());
                assert!(p.temp_id.is_none());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn parse_typing_events() {
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"typing_start","conversation_id":5}"#).unwrap(),
            ClientEvent::TypingStart(_)
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"type":"typing_stop","conversation_id":5}"#).unwrap(),
            ClientEvent::TypingStop(_)
        ));
    }

    #[test]
    fn parse_ping() {
        assert!(matches!(ClientEvent::parse(r#"{"type":"ping"}"#).unwrap(), ClientEvent::Ping));
    }

    #[test]
    fn unknown_type_is_distinct_from_malformed() {
        let err = ClientEvent::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert!(matches!(err, EventParseError::UnknownType(ref t) if t == "dance"));

        let err = ClientEvent::parse("not json").unwrap_err();
        assert!(matches!(err, EventParseError::Malformed(_)));

        let err = ClientEvent::parse(r#"{"conversation_id":1}"#).unwrap_err();
        assert!(matches!(err, EventParseError::Malformed(_)));
    }

    #[test]
    fn auth_with_unknown_role_is_malformed() {
        let err = ClientEvent::parse(r#"{"type":"auth","participant_type":"ghost","participant_id":1}"#)
            .unwrap_err();
        assert!(matches!(err, EventParseError::Malformed(_)));
    }

    #[test]
    fn unknown_fields_ignored() {
        let event = ClientEvent::parse(
            r#"{"type":"subscribe_conversation","conversation_id":3,"extra":"ignored"}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::SubscribeConversation(_)));
    }

    #[test]
    fn serialize_new_message() {
        let event = ServerEvent::NewMessage {
            message_id: MessageId::from_raw(10),
            conversation_id: ConversationId::from_raw(42),
            sender_type: ParticipantRole::User,
            sender_id: 7,
            sender_name: "Ada".into(),
            content: "hello".into(),
            reply_to_id: None,
            created_at: "2026-01-01T00:00:00+00:00".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["message_id"], 10);
        assert_eq!(json["conversation_id"], 42);
        assert_eq!(json["sender_type"], "user");
        assert_eq!(json["sender_id"], 7);
        assert_eq!(json["sender_name"], "Ada");
        assert_eq!(json["reply_to_id"], serde_json::Value::Null);
    }

    #[test]
    fn serialize_status_change() {
        let event = ServerEvent::StatusChange {
            user_id: "mentor_3".into(),
            participant_type: ParticipantRole::Mentor,
            participant_id: 3,
            status: PresenceStatus::Online,
            timestamp: "2026-01-01T00:00:00+00:00".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_change");
        assert_eq!(json["user_id"], "mentor_3");
        assert_eq!(json["status"], "online");
    }

    #[test]
    fn serialize_pong_and_subscribed() {
        let json: serde_json::Value = serde_json::to_value(&ServerEvent::Pong).unwrap();
        assert_eq!(json["type"], "pong");

        let json: serde_json::Value = serde_json::to_value(&ServerEvent::Subscribed {
            conversation_id: ConversationId::from_raw(3),
        })
        .unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["conversation_id"], 3);
    }

    #[test]
    fn message_sent_echoes_temp_id() {
        let event = ServerEvent::MessageSent {
            message_id: MessageId::from_raw(5),
            temp_id: Some(serde_json::json!("tmp-9")),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["temp_id"], "tmp-9");
    }
}
