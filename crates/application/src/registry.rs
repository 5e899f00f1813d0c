//! 实时连接注册表
//!
//! 维护三张索引并负责扇出：
//! - 会话索引：用户 -> 该用户当前打开的连接
//! - 成员索引：用户 -> 用户所属聊天（首次连接时从目录加载一次，之后不刷新）
//! - 订阅索引：聊天 -> 订阅该聊天的连接
//!
//! 所有索引由同一把读写锁保护。投递在锁外针对快照进行，
//! 单条连接写入缓慢不会阻塞注册/注销或其他连接的投递。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{
    ChatId, ConnectionId, IncomingWebSocketMessage, OutgoingWebSocketMessage, SendMessagePayload,
    UserId,
};
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::connection::{CloseReason, ConnectionSink, DeliveryError};
use crate::error::{ApplicationError, AuthError};
use crate::repository::{bearer_credential, ChatDirectory, MessageStore, TokenVerifier};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Authentication(#[from] AuthError),
    #[error("chat directory lookup failed: {0}")]
    Directory(ApplicationError),
}

/// 注册成功后分配的连接信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
}

/// 一次扇出的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// 快照之后已关闭的连接
    pub skipped: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn targeted(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

/// 入站帧的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// 消息已持久化并广播
    Broadcast(DeliveryReport),
    /// 无法解析，已向来源连接回复 ERROR
    InvalidPayload,
    /// 发送者不是目标聊天成员，静默丢弃
    NotAMember,
    /// 持久化失败，未广播
    PersistFailed,
    /// 连接已不在注册表中
    UnknownConnection,
}

struct ConnectionEntry {
    user_id: UserId,
    sink: Arc<dyn ConnectionSink>,
}

type Target = (ConnectionId, Arc<dyn ConnectionSink>);

#[derive(Default)]
struct RegistryIndices {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    user_connections: HashMap<UserId, HashSet<ConnectionId>>,
    user_chats: HashMap<UserId, HashSet<ChatId>>,
    chat_connections: HashMap<ChatId, HashSet<ConnectionId>>,
}

impl RegistryIndices {
    fn insert(&mut self, connection_id: ConnectionId, user_id: UserId, sink: Arc<dyn ConnectionSink>) {
        let RegistryIndices {
            connections,
            user_connections,
            user_chats,
            chat_connections,
        } = self;

        connections.insert(connection_id, ConnectionEntry { user_id, sink });
        user_connections
            .entry(user_id)
            .or_default()
            .insert(connection_id);

        if let Some(chats) = user_chats.get(&user_id) {
            for chat_id in chats {
                chat_connections
                    .entry(*chat_id)
                    .or_default()
                    .insert(connection_id);
            }
        }
    }

    fn remove(&mut self, connection_id: ConnectionId) -> Option<UserId> {
        let entry = self.connections.remove(&connection_id)?;
        let user_id = entry.user_id;

        if let Some(chats) = self.user_chats.get(&user_id) {
            for chat_id in chats {
                // 空集合保留，读取方把缺失和空集合视为相同
                if let Some(subscribers) = self.chat_connections.get_mut(chat_id) {
                    subscribers.remove(&connection_id);
                }
            }
        }

        let now_empty = match self.user_connections.get_mut(&user_id) {
            Some(sessions) => {
                sessions.remove(&connection_id);
                sessions.is_empty()
            }
            None => true,
        };
        if now_empty {
            self.user_connections.remove(&user_id);
            // 下次连接时重新从目录加载成员关系
            self.user_chats.remove(&user_id);
        }

        Some(user_id)
    }

    fn targets<'a>(&self, ids: impl IntoIterator<Item = &'a ConnectionId>) -> Vec<Target> {
        ids.into_iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|entry| (*id, Arc::clone(&entry.sink)))
            })
            .collect()
    }

    fn chat_targets(&self, chat_id: ChatId) -> Vec<Target> {
        match self.chat_connections.get(&chat_id) {
            Some(subscribers) => self.targets(subscribers),
            None => Vec::new(),
        }
    }

    fn user_targets(&self, user_id: UserId) -> Vec<Target> {
        match self.user_connections.get(&user_id) {
            Some(sessions) => self.targets(sessions),
            None => Vec::new(),
        }
    }
}

pub struct ConnectionRegistry {
    verifier: Arc<dyn TokenVerifier>,
    directory: Arc<dyn ChatDirectory>,
    message_store: Arc<dyn MessageStore>,
    indices: RwLock<RegistryIndices>,
}

impl ConnectionRegistry {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn ChatDirectory>,
        message_store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            verifier,
            directory,
            message_store,
            indices: RwLock::new(RegistryIndices::default()),
        }
    }

    /// 认证并登记新连接
    ///
    /// 认证失败时以协议错误状态关闭连接，不会重试。
    /// 用户在本进程内第一次连接时，在写锁内查询一次聊天目录：
    /// 同一时刻的其他注册/注销需要等待这次查询，首连可能较慢。
    pub async fn register(
        &self,
        raw_auth_token: Option<&str>,
        sink: Arc<dyn ConnectionSink>,
    ) -> Result<Registration, RegistryError> {
        let user_id = match self.authenticate(raw_auth_token) {
            Ok(user_id) => user_id,
            Err(err) => {
                warn!(error = %err, "closing connection: authentication failed");
                sink.close(CloseReason::AuthenticationFailed).await;
                return Err(err.into());
            }
        };

        let connection_id = ConnectionId::random();
        {
            let mut indices = self.indices.write().await;
            if !indices.user_chats.contains_key(&user_id) {
                match self.directory.chats_for_user(user_id).await {
                    Ok(chats) => {
                        debug!(user_id = %user_id, chats = chats.len(), "loaded chat memberships");
                        indices.user_chats.insert(user_id, chats);
                    }
                    Err(err) => {
                        drop(indices);
                        error!(user_id = %user_id, error = %err, "failed to load chat memberships");
                        sink.close(CloseReason::ServerError).await;
                        return Err(RegistryError::Directory(err));
                    }
                }
            }
            indices.insert(connection_id, user_id, sink);
        }

        info!(user_id = %user_id, connection_id = %connection_id, "websocket connection established");
        Ok(Registration {
            connection_id,
            user_id,
        })
    }

    fn authenticate(&self, raw_auth_token: Option<&str>) -> Result<UserId, AuthError> {
        let token = raw_auth_token
            .and_then(bearer_credential)
            .ok_or(AuthError::MissingCredential)?;
        self.verifier.verify(token)
    }

    /// 移除连接及其在所有索引中的记录，返回连接所属用户
    pub async fn deregister(&self, connection_id: ConnectionId) -> Option<UserId> {
        let user_id = self.indices.write().await.remove(connection_id);
        match user_id {
            Some(user_id) => {
                info!(user_id = %user_id, connection_id = %connection_id, "websocket connection closed");
            }
            None => {
                debug!(connection_id = %connection_id, "deregister for unknown connection");
            }
        }
        user_id
    }

    /// 处理来自连接的原始文本帧。格式错误只回复 ERROR，不会断开连接。
    pub async fn handle_inbound_message(
        &self,
        connection_id: ConnectionId,
        raw_payload: &str,
    ) -> InboundOutcome {
        debug!(connection_id = %connection_id, payload = raw_payload, "received message");

        let origin = {
            let indices = self.indices.read().await;
            indices
                .connections
                .get(&connection_id)
                .map(|entry| (entry.user_id, Arc::clone(&entry.sink)))
        };
        let Some((user_id, sink)) = origin else {
            return InboundOutcome::UnknownConnection;
        };

        match IncomingWebSocketMessage::parse(raw_payload) {
            Ok(IncomingWebSocketMessage::NewMessage(payload)) => {
                self.handle_send_message(user_id, payload).await
            }
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "couldn't parse inbound message");
                self.deliver(
                    vec![(connection_id, sink)],
                    &OutgoingWebSocketMessage::invalid_json(),
                )
                .await;
                InboundOutcome::InvalidPayload
            }
        }
    }

    async fn handle_send_message(
        &self,
        sender_id: UserId,
        payload: SendMessagePayload,
    ) -> InboundOutcome {
        let chat_id = payload.chat_id;
        if !self.is_member(sender_id, chat_id).await {
            debug!(user_id = %sender_id, chat_id = %chat_id, "dropping message for non-member");
            return InboundOutcome::NotAMember;
        }

        let saved = match self
            .message_store
            .persist_and_return(chat_id, sender_id, &payload.content, payload.message_id)
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                error!(user_id = %sender_id, chat_id = %chat_id, error = %err, "failed to persist message");
                return InboundOutcome::PersistFailed;
            }
        };

        let report = self
            .broadcast(chat_id, &OutgoingWebSocketMessage::NewMessage(saved))
            .await;
        InboundOutcome::Broadcast(report)
    }

    /// 成员判断只看成员索引，不回查目录
    pub async fn is_member(&self, user_id: UserId, chat_id: ChatId) -> bool {
        self.indices
            .read()
            .await
            .user_chats
            .get(&user_id)
            .is_some_and(|chats| chats.contains(&chat_id))
    }

    /// 向聊天的全部订阅连接投递事件。单条连接失败只记录日志。
    pub async fn broadcast(&self, chat_id: ChatId, event: &OutgoingWebSocketMessage) -> DeliveryReport {
        let targets = self.indices.read().await.chat_targets(chat_id);
        self.deliver(targets, event).await
    }

    /// 向若干聊天的订阅连接投递事件，同一连接只投递一次
    pub async fn broadcast_to_chats(
        &self,
        chat_ids: &HashSet<ChatId>,
        event: &OutgoingWebSocketMessage,
    ) -> DeliveryReport {
        let targets = {
            let indices = self.indices.read().await;
            let ids: HashSet<ConnectionId> = chat_ids
                .iter()
                .filter_map(|chat_id| indices.chat_connections.get(chat_id))
                .flatten()
                .copied()
                .collect();
            indices.targets(&ids)
        };
        self.deliver(targets, event).await
    }

    /// 向用户的全部连接投递事件
    pub async fn unicast(&self, user_id: UserId, event: &OutgoingWebSocketMessage) -> DeliveryReport {
        let targets = self.indices.read().await.user_targets(user_id);
        self.deliver(targets, event).await
    }

    async fn deliver(&self, targets: Vec<Target>, event: &OutgoingWebSocketMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if targets.is_empty() {
            return report;
        }

        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(err) => {
                error!(kind = event.kind(), error = %err, "failed to serialize outbound frame");
                return report;
            }
        };

        let frame = frame.as_str();
        let results = join_all(targets.into_iter().map(|(connection_id, sink)| async move {
            if !sink.is_open() {
                return (connection_id, Err(DeliveryError::Closed));
            }
            (connection_id, sink.send(frame).await)
        }))
        .await;

        for (connection_id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Closed) => {
                    debug!(connection_id = %connection_id, "skipping closed connection");
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(connection_id = %connection_id, kind = event.kind(), error = %err, "failed to deliver frame");
                    report.failed += 1;
                }
            }
        }

        debug!(
            kind = event.kind(),
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "fan-out complete"
        );
        report
    }

    /// 关闭所有连接并清空索引
    pub async fn shutdown(&self) {
        let indices = std::mem::take(&mut *self.indices.write().await);
        let sinks: Vec<_> = indices
            .connections
            .into_values()
            .map(|entry| entry.sink)
            .collect();
        info!(connections = sinks.len(), "closing all websocket connections");
        join_all(sinks.iter().map(|sink| sink.close(CloseReason::GoingAway))).await;
    }

    pub async fn connections_for_user(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.indices
            .read()
            .await
            .user_connections
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn subscribers_of(&self, chat_id: ChatId) -> HashSet<ConnectionId> {
        self.indices
            .read()
            .await
            .chat_connections
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn chats_for_user(&self, user_id: UserId) -> Option<HashSet<ChatId>> {
        self.indices.read().await.user_chats.get(&user_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.indices.read().await.connections.len()
    }
}
