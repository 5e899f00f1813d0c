//! 外部协作方接口
//!
//! 聊天目录、消息持久化与设备令牌存储由外部系统提供，核心只依赖这里的 trait。

use std::collections::HashSet;

use async_trait::async_trait;
use domain::{ChatId, ChatMessage, DeviceToken, MessageId, UserId};

use crate::error::{ApplicationError, AuthError};

/// 从原始凭证中取出令牌：去掉可选的 `Bearer` 前缀和空白，空凭证返回 None
pub fn bearer_credential(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let token = match raw.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => raw,
    };
    (!token.is_empty()).then_some(token)
}

/// 令牌校验：原始令牌 -> 用户ID
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, raw_token: &str) -> Result<UserId, AuthError>;
}

#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// 用户当前所属的全部聊天
    async fn chats_for_user(&self, user_id: UserId) -> Result<HashSet<ChatId>, ApplicationError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 保存消息并返回持久化后的结果。
    /// 传入 `message_id` 时必须幂等，以容忍传输层的至少一次投递。
    async fn persist_and_return(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
        message_id: Option<MessageId>,
    ) -> Result<ChatMessage, ApplicationError>;
}

#[async_trait]
pub trait DeviceTokenStore: Send + Sync {
    async fn find_by_user_ids(
        &self,
        user_ids: &[UserId],
    ) -> Result<Vec<DeviceToken>, ApplicationError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<DeviceToken>, ApplicationError>;

    async fn save(&self, device: DeviceToken) -> Result<DeviceToken, ApplicationError>;

    async fn remove(&self, token: &str) -> Result<(), ApplicationError>;
}
