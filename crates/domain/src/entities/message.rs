//! 聊天消息实体

use serde::{Deserialize, Serialize};

use crate::value_objects::{ChatId, MessageId, Timestamp, UserId};

/// 已持久化的聊天消息，也是 NEW_MESSAGE 帧的载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub content: String,
    pub created_at: Timestamp,
    pub sender_id: UserId,
}

impl ChatMessage {
    pub fn new(
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            chat_id,
            content: content.into(),
            created_at,
            sender_id,
        }
    }
}
