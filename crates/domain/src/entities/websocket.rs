//! WebSocket 线路格式
//!
//! 入站与出站帧都是 `{ "type": ..., "payload": ... }` 形式的带标签联合体。

use serde::{Deserialize, Serialize};

use crate::entities::message::ChatMessage;
use crate::value_objects::{ChatId, MessageId, UserId};

/// 入站帧无法解析时返回的错误码
pub const INVALID_JSON: &str = "INVALID_JSON";

/// 客户端发往服务器的帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomingWebSocketMessage {
    NewMessage(SendMessagePayload),
}

impl IncomingWebSocketMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub chat_id: ChatId,
    pub content: String,
    /// 客户端自带的消息ID，用于幂等重投
    #[serde(default)]
    pub message_id: Option<MessageId>,
}

/// 服务器发往客户端的帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutgoingWebSocketMessage {
    NewMessage(ChatMessage),
    MessageDeleted(MessageDeletedPayload),
    ProfilePictureUpdated(ProfilePictureUpdatedPayload),
    ChatParticipantsChanged(ChatParticipantsChangedPayload),
    Error(ErrorPayload),
}

impl OutgoingWebSocketMessage {
    pub fn invalid_json() -> Self {
        Self::Error(ErrorPayload {
            code: INVALID_JSON.to_string(),
            message: "Incoming JSON or UUID is invalid".to_string(),
        })
    }

    /// 帧类型名，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "NEW_MESSAGE",
            Self::MessageDeleted(_) => "MESSAGE_DELETED",
            Self::ProfilePictureUpdated(_) => "PROFILE_PICTURE_UPDATED",
            Self::ChatParticipantsChanged(_) => "CHAT_PARTICIPANTS_CHANGED",
            Self::Error(_) => "ERROR",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePictureUpdatedPayload {
    pub user_id: UserId,
    pub new_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParticipantsChangedPayload {
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn parses_new_message_envelope() {
        let chat_id = Uuid::new_v4();
        let raw = json!({
            "type": "NEW_MESSAGE",
            "payload": { "chatId": chat_id, "content": "hi" }
        })
        .to_string();

        let parsed = IncomingWebSocketMessage::parse(&raw).unwrap();
        let IncomingWebSocketMessage::NewMessage(payload) = parsed;
        assert_eq!(payload.chat_id, ChatId::from(chat_id));
        assert_eq!(payload.content, "hi");
        assert!(payload.message_id.is_none());
    }

    #[test]
    fn rejects_unknown_type_and_bad_uuid() {
        let unknown = json!({ "type": "TYPING", "payload": {} }).to_string();
        assert!(IncomingWebSocketMessage::parse(&unknown).is_err());

        let bad_uuid = json!({
            "type": "NEW_MESSAGE",
            "payload": { "chatId": "nope", "content": "hi" }
        })
        .to_string();
        assert!(IncomingWebSocketMessage::parse(&bad_uuid).is_err());

        assert!(IncomingWebSocketMessage::parse("{not json").is_err());
    }

    #[test]
    fn error_frame_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&OutgoingWebSocketMessage::invalid_json().to_json().unwrap())
                .unwrap();
        assert_eq!(value["type"], "ERROR");
        assert_eq!(value["payload"]["code"], INVALID_JSON);
    }

    #[test]
    fn participants_changed_uses_camel_case() {
        let chat_id = ChatId::from(Uuid::new_v4());
        let frame = OutgoingWebSocketMessage::ChatParticipantsChanged(
            ChatParticipantsChangedPayload { chat_id },
        );
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "CHAT_PARTICIPANTS_CHANGED");
        assert_eq!(value["payload"]["chatId"], chat_id.to_string());
    }
}
