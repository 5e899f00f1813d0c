//! 聊天相关的领域事件
//!
//! 封闭的事件集合，消费方通过穷尽匹配分发。

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{ChatId, MessageId, Timestamp, UserId};

/// 聊天相关的领域事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    /// 新消息已持久化
    NewMessage {
        sender_id: UserId,
        sender_username: String,
        recipient_ids: HashSet<UserId>,
        chat_id: ChatId,
        message: String,
    },

    /// 消息已删除
    MessageDeleted { chat_id: ChatId, message_id: MessageId },

    /// 用户头像已更新
    ProfilePictureUpdated {
        user_id: UserId,
        new_url: Option<String>,
    },

    /// 用户加入聊天
    ChatParticipantsJoined {
        chat_id: ChatId,
        user_ids: HashSet<UserId>,
    },

    /// 用户离开聊天
    ChatParticipantLeft { chat_id: ChatId, user_id: UserId },
}

impl ChatEvent {
    /// 事件类型名，用于日志和路由
    pub fn event_key(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage { .. } => "chat.new_message",
            ChatEvent::MessageDeleted { .. } => "chat.message_deleted",
            ChatEvent::ProfilePictureUpdated { .. } => "user.profile_picture_updated",
            ChatEvent::ChatParticipantsJoined { .. } => "chat.participants_joined",
            ChatEvent::ChatParticipantLeft { .. } => "chat.participant_left",
        }
    }
}

/// 发布到事件总线上的事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub occurred_at: Timestamp,
    pub event: ChatEvent,
}

impl EventEnvelope {
    pub fn new(event: ChatEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }
}
