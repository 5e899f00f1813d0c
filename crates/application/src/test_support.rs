//! 单元测试共用的桩实现

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use domain::{ChatId, ChatMessage, MessageId, UserId};

use crate::connection::{CloseReason, ConnectionSink, DeliveryError};
use crate::error::ApplicationError;
use crate::repository::{ChatDirectory, MessageStore};

/// 记录收到的帧与关闭原因
pub struct RecordingSink {
    frames: Mutex<Vec<String>>,
    open: AtomicBool,
    closed_with: Mutex<Option<CloseReason>>,
    failing: bool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            closed_with: Mutex::new(None),
            failing: false,
        })
    }

    /// 每次写入都失败的连接
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            closed_with: Mutex::new(None),
            failing: true,
        })
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    pub fn closed_with(&self) -> Option<CloseReason> {
        *self.closed_with.lock().unwrap()
    }
}

#[async_trait]
impl ConnectionSink for RecordingSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: &str) -> Result<(), DeliveryError> {
        if self.failing {
            return Err(DeliveryError::Failed("broken pipe".into()));
        }
        self.frames.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    async fn close(&self, reason: CloseReason) {
        self.open.store(false, Ordering::SeqCst);
        *self.closed_with.lock().unwrap() = Some(reason);
    }
}

/// 固定成员关系的聊天目录
#[derive(Default)]
pub struct StaticDirectory {
    memberships: HashMap<UserId, HashSet<ChatId>>,
    failing: Mutex<HashSet<UserId>>,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(memberships: &[(UserId, Vec<ChatId>)]) -> Self {
        Self {
            memberships: memberships
                .iter()
                .map(|(user, chats)| (*user, chats.iter().copied().collect()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn fail_for(&self, user_id: UserId) {
        self.failing.lock().unwrap().insert(user_id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatDirectory for StaticDirectory {
    async fn chats_for_user(&self, user_id: UserId) -> Result<HashSet<ChatId>, ApplicationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&user_id) {
            return Err(ApplicationError::infrastructure("directory unavailable"));
        }
        Ok(self.memberships.get(&user_id).cloned().unwrap_or_default())
    }
}

/// 原样回显的消息存储
#[derive(Default)]
pub struct EchoMessageStore {
    fail_next: AtomicBool,
    calls: AtomicUsize,
}

impl EchoMessageStore {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for EchoMessageStore {
    async fn persist_and_return(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
        message_id: Option<MessageId>,
    ) -> Result<ChatMessage, ApplicationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ApplicationError::infrastructure("store unavailable"));
        }
        Ok(ChatMessage::new(
            message_id.unwrap_or_else(MessageId::random),
            chat_id,
            sender_id,
            content,
            Utc::now(),
        ))
    }
}
