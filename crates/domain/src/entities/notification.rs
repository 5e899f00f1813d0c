//! 推送通知实体
//!
//! 设备令牌、待推送的通知以及推送网关返回的结果分类。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{ChatId, Timestamp, UserId};

/// 设备平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Android,
    Ios,
}

/// 已注册的推送设备令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub user_id: UserId,
    pub token: String,
    pub platform: Platform,
    pub created_at: Timestamp,
}

/// 一条推送通知，`recipients` 为需要投递的设备集合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub chat_id: ChatId,
    pub recipients: Vec<DeviceToken>,
    pub data: HashMap<String, String>,
    /// 通知首次创建的时间，重试的年龄上限以此为基准
    pub created_at: Timestamp,
}

impl PushNotification {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        chat_id: ChatId,
        recipients: Vec<DeviceToken>,
        data: HashMap<String, String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
            chat_id,
            recipients,
            data,
            created_at,
        }
    }

    /// 展开为每个设备一条的网关消息，顺序与 `recipients` 一致
    pub fn messages(&self) -> Vec<PushMessage> {
        self.recipients
            .iter()
            .map(|device| PushMessage {
                token: device.token.clone(),
                platform: device.platform,
                title: self.title.clone(),
                body: self.body.clone(),
                collapse_key: self.chat_id.to_string(),
                data: self.data.clone(),
            })
            .collect()
    }

    /// 保留通知内容，只替换收件设备（用于重试）
    pub fn with_recipients(&self, recipients: Vec<DeviceToken>) -> Self {
        Self {
            recipients,
            ..self.clone()
        }
    }
}

/// 发往推送网关的单设备消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub token: String,
    pub platform: Platform,
    pub title: String,
    pub body: String,
    /// 同一聊天的通知在设备上折叠为一条
    pub collapse_key: String,
    pub data: HashMap<String, String>,
}

/// 单个设备的推送结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Succeeded,
    /// 配额、服务暂不可用等，可重试
    TemporaryFailure,
    /// 令牌失效、未注册等，永不重试
    PermanentFailure,
}

/// 一次批量推送按结果划分后的设备集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSendResult {
    pub succeeded: Vec<DeviceToken>,
    pub temporary_failures: Vec<DeviceToken>,
    pub permanent_failures: Vec<DeviceToken>,
}

impl PushSendResult {
    /// 按下标把网关返回的结果与设备对应起来。缺失的结果视为临时失败。
    pub fn partition(recipients: &[DeviceToken], outcomes: &[PushOutcome]) -> Self {
        let mut result = Self::default();
        for (index, device) in recipients.iter().enumerate() {
            let outcome = outcomes
                .get(index)
                .copied()
                .unwrap_or(PushOutcome::TemporaryFailure);
            match outcome {
                PushOutcome::Succeeded => result.succeeded.push(device.clone()),
                PushOutcome::TemporaryFailure => result.temporary_failures.push(device.clone()),
                PushOutcome::PermanentFailure => result.permanent_failures.push(device.clone()),
            }
        }
        result
    }
}
