//! # Connection Wire Shapes
//!
//! The inbound client message union and the outbound notification envelope
//! for the chat connection. Every outbound frame carries the same
//! `{status, type, success, message, data?}` envelope; `data.type`
//! discriminates the payload kind.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Inbound messages, JSON-tagged on `type`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "AUTH")]
    Auth { token: String },
    #[serde(rename = "CHAT")]
    Chat {
        message: String,
        #[serde(default, rename = "chatId")]
        chat_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
}

/// The outbound envelope sent to the client for every event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub status: u16,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Notification {
    pub fn success(status: u16, message: impl Into<String>, data: Option<Value>) -> Self {
        Notification {
            status,
            kind: NotificationKind::Success,
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Notification {
            status,
            kind: NotificationKind::Error,
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// The `data.type` discriminator, when present.
    pub fn data_type(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("type"))
            .and_then(Value::as_str)
    }
}

/// Payload builders for the notable `data.type` discriminators.
pub mod payload {
    use super::*;
    use crate::types::{Chat, Message};
    use studyrag_access::User;

    pub fn auth(user: &User) -> Value {
        json!({ "type": "AUTH", "user": user })
    }

    pub fn chat_info(chat: &Chat) -> Value {
        json!({ "type": "CHAT_INFO", "chat": chat })
    }

    pub fn chat_info_update(chat: &Chat) -> Value {
        json!({ "type": "CHAT_INFO_UPDATE", "chat": chat })
    }

    pub fn user_message(message: &Message) -> Value {
        json!({ "type": "USER_MESSAGE", "message": message })
    }

    /// Carries only the latest delta; the client concatenates.
    pub fn message_delta(delta: &str) -> Value {
        json!({ "type": "MESSAGE", "delta": delta })
    }

    pub fn tool_call(name: &str, arguments: &str) -> Value {
        json!({ "type": "TOOL_CALL", "name": name, "arguments": arguments })
    }

    pub fn tool_result(name: &str, output: &Value) -> Value {
        json!({ "type": "TOOL_RESULT", "name": name, "output": output })
    }

    pub fn final_message(message: &Message) -> Value {
        json!({ "type": "FINAL_MESSAGE", "message": message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parses_auth_and_chat() {
        let auth: ClientMessage =
            serde_json::from_str(r#"{"type":"AUTH","data":{"token":"t-1"}}"#).unwrap();
        assert_eq!(
            auth,
            ClientMessage::Auth {
                token: "t-1".to_string()
            }
        );

        let chat: ClientMessage =
            serde_json::from_str(r#"{"type":"CHAT","data":{"message":"hi","chatId":null}}"#)
                .unwrap();
        assert_eq!(
            chat,
            ClientMessage::Chat {
                message: "hi".to_string(),
                chat_id: None
            }
        );
    }

    #[test]
    fn test_notification_envelope_shape() {
        let n = Notification::success(200, "ok", Some(payload::message_delta("abc")));
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["status"], 200);
        assert_eq!(value["type"], "success");
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["type"], "MESSAGE");
        assert_eq!(value["data"]["delta"], "abc");

        let e = Notification::error(401, "Unauthorized Access: Token is invalid");
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["type"], "error");
        assert!(value.get("data").is_none());
    }
}
