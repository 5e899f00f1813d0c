//! 内存实现的聊天目录、消息存储与设备令牌存储
//!
//! 每次变更在更新存储之后显式发布事件，没有隐式拦截。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use application::{
    ApplicationError, ChatDirectory, Clock, DeviceTokenStore, EventPublisher, MessageStore,
};
use async_trait::async_trait;
use domain::{
    ChatEvent, ChatId, ChatMessage, DeviceToken, DomainError, EventEnvelope, MessageId, UserId,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct DirectoryState {
    participants: HashMap<ChatId, HashSet<UserId>>,
    usernames: HashMap<UserId, String>,
}

/// 聊天成员关系与用户名
pub struct MemoryChatDirectory {
    state: RwLock<DirectoryState>,
    publisher: Arc<dyn EventPublisher>,
}

impl MemoryChatDirectory {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            publisher,
        }
    }

    pub async fn set_username(&self, user_id: UserId, username: impl Into<String>) {
        self.state
            .write()
            .await
            .usernames
            .insert(user_id, username.into());
    }

    /// 未设置用户名时退回用户ID字符串
    pub async fn username(&self, user_id: UserId) -> String {
        self.state
            .read()
            .await
            .usernames
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string())
    }

    pub async fn participants(&self, chat_id: ChatId) -> HashSet<UserId> {
        self.state
            .read()
            .await
            .participants
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 添加成员并发布加入事件，返回实际新加入的用户
    pub async fn add_participants(
        &self,
        chat_id: ChatId,
        user_ids: impl IntoIterator<Item = UserId>,
    ) -> Result<HashSet<UserId>, ApplicationError> {
        let added: HashSet<UserId> = {
            let mut state = self.state.write().await;
            let members = state.participants.entry(chat_id).or_default();
            user_ids
                .into_iter()
                .filter(|user_id| members.insert(*user_id))
                .collect()
        };

        if !added.is_empty() {
            self.publisher
                .publish(EventEnvelope::new(ChatEvent::ChatParticipantsJoined {
                    chat_id,
                    user_ids: added.clone(),
                }))
                .await?;
        }
        Ok(added)
    }

    pub async fn remove_participant(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let removed = {
            let mut state = self.state.write().await;
            state
                .participants
                .get_mut(&chat_id)
                .is_some_and(|members| members.remove(&user_id))
        };
        if !removed {
            return Err(DomainError::resource_not_found("chat_participant", user_id.to_string()).into());
        }

        self.publisher
            .publish(EventEnvelope::new(ChatEvent::ChatParticipantLeft { chat_id, user_id }))
            .await?;
        Ok(())
    }

    /// 更新头像并通知该用户所在的聊天
    pub async fn update_profile_picture(
        &self,
        user_id: UserId,
        new_url: Option<String>,
    ) -> Result<(), ApplicationError> {
        self.publisher
            .publish(EventEnvelope::new(ChatEvent::ProfilePictureUpdated { user_id, new_url }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatDirectory for MemoryChatDirectory {
    async fn chats_for_user(&self, user_id: UserId) -> Result<HashSet<ChatId>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state
            .participants
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(chat_id, _)| *chat_id)
            .collect())
    }
}

/// 消息存储。带客户端ID的重复写入返回已存在的消息，不会重复发布事件。
pub struct MemoryMessageStore {
    messages: RwLock<HashMap<MessageId, ChatMessage>>,
    directory: Arc<MemoryChatDirectory>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl MemoryMessageStore {
    pub fn new(
        directory: Arc<MemoryChatDirectory>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            directory,
            publisher,
            clock,
        }
    }

    pub async fn find(&self, message_id: MessageId) -> Option<ChatMessage> {
        self.messages.read().await.get(&message_id).cloned()
    }

    pub async fn delete(&self, message_id: MessageId) -> Result<ChatMessage, ApplicationError> {
        let removed = self
            .messages
            .write()
            .await
            .remove(&message_id)
            .ok_or_else(|| DomainError::resource_not_found("message", message_id.to_string()))?;

        self.publisher
            .publish(EventEnvelope::new(ChatEvent::MessageDeleted {
                chat_id: removed.chat_id,
                message_id,
            }))
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn persist_and_return(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
        message_id: Option<MessageId>,
    ) -> Result<ChatMessage, ApplicationError> {
        if content.trim().is_empty() {
            return Err(DomainError::validation_error("content", "must not be empty").into());
        }

        let id = message_id.unwrap_or_else(MessageId::random);
        let message = {
            let mut messages = self.messages.write().await;
            if let Some(existing) = messages.get(&id) {
                debug!(message_id = %id, "message already stored");
                return Ok(existing.clone());
            }
            let message = ChatMessage::new(id, chat_id, sender_id, content, self.clock.now());
            messages.insert(id, message.clone());
            message
        };

        let event = ChatEvent::NewMessage {
            sender_id,
            sender_username: self.directory.username(sender_id).await,
            recipient_ids: self.directory.participants(chat_id).await,
            chat_id,
            message: message.content.clone(),
        };
        // 消息已保存，通知失败不影响写入结果
        if let Err(err) = self.publisher.publish(EventEnvelope::new(event)).await {
            warn!(message_id = %id, error = %err, "failed to publish new message event");
        }
        Ok(message)
    }
}

#[derive(Default)]
pub struct MemoryDeviceTokenStore {
    devices: RwLock<HashMap<String, DeviceToken>>,
}

impl MemoryDeviceTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[async_trait]
impl DeviceTokenStore for MemoryDeviceTokenStore {
    async fn find_by_user_ids(
        &self,
        user_ids: &[UserId],
    ) -> Result<Vec<DeviceToken>, ApplicationError> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .filter(|device| user_ids.contains(&device.user_id))
            .cloned()
            .collect())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<DeviceToken>, ApplicationError> {
        Ok(self.devices.read().await.get(token).cloned())
    }

    async fn save(&self, device: DeviceToken) -> Result<DeviceToken, ApplicationError> {
        self.devices
            .write()
            .await
            .insert(device.token.clone(), device.clone());
        Ok(device)
    }

    async fn remove(&self, token: &str) -> Result<(), ApplicationError> {
        if self.devices.write().await.remove(token).is_none() {
            debug!("device token already removed");
        }
        Ok(())
    }
}
