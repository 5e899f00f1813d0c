//! 推送通知服务
//!
//! 负责设备注册、新消息通知，以及对临时失败的设备按退避表重试。
//! 永久失败的设备令牌直接注销；超过年龄上限的重试丢弃。
//! 重试只保存在内存中，进程重启即丢失。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use domain::{
    ChatId, DeviceToken, DomainError, Platform, PushNotification, PushSendResult, Timestamp,
    UserId,
};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::push::gateway::PushGateway;
use crate::push::retry::{PendingRetry, RetryQueue, RetrySchedule};
use crate::repository::DeviceTokenStore;

pub const NEW_MESSAGE_TYPE: &str = "new_message";

/// 一轮清扫的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweepReport {
    pub attempted: usize,
    /// 超过年龄上限被丢弃
    pub expired: usize,
    /// 网关或存储报错
    pub failed: usize,
}

pub struct PushNotificationService {
    gateway: Arc<dyn PushGateway>,
    devices: Arc<dyn DeviceTokenStore>,
    clock: Arc<dyn Clock>,
    schedule: RetrySchedule,
    queue: RetryQueue,
}

impl PushNotificationService {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        devices: Arc<dyn DeviceTokenStore>,
        clock: Arc<dyn Clock>,
        schedule: RetrySchedule,
    ) -> Self {
        Self {
            gateway,
            devices,
            clock,
            schedule,
            queue: RetryQueue::new(),
        }
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// 推送给通知中的全部设备。
    ///
    /// 永久失败的令牌从存储中移除；存在临时失败且退避表未用尽时，
    /// 只对失败设备排一次 `attempt + 1` 的重试，延迟为 `table[attempt]`。
    #[instrument(skip(self, notification), fields(notification_id = %notification.id, recipients = notification.recipients.len()))]
    pub async fn send_with_retry(
        &self,
        notification: PushNotification,
        attempt: u32,
    ) -> Result<PushSendResult, ApplicationError> {
        if notification.recipients.is_empty() {
            return Ok(PushSendResult::default());
        }

        let outcomes = self.gateway.send_batch(&notification.messages()).await?;
        let result = PushSendResult::partition(&notification.recipients, &outcomes);

        if !result.succeeded.is_empty() {
            info!(succeeded = result.succeeded.len(), attempt, "push notifications delivered");
        }

        for device in &result.permanent_failures {
            warn!(user_id = %device.user_id, "removing device token after permanent push failure");
            if let Err(err) = self.devices.remove(&device.token).await {
                warn!(user_id = %device.user_id, error = %err, "failed to remove device token");
            }
        }

        if !result.temporary_failures.is_empty() {
            if self.schedule.allows_retry(attempt) {
                let delay = self.schedule.delay_for(attempt);
                let now = self.clock.now();
                let execute_at = now
                    + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());
                let retry = PendingRetry {
                    notification: notification.with_recipients(result.temporary_failures.clone()),
                    attempt: attempt + 1,
                    execute_at,
                };
                debug!(
                    attempt = retry.attempt,
                    delay_secs = delay.as_secs(),
                    devices = result.temporary_failures.len(),
                    "scheduled push retry"
                );
                self.queue.push(retry).await;
            } else {
                warn!(
                    attempt,
                    devices = result.temporary_failures.len(),
                    "push retries exhausted"
                );
            }
        }

        Ok(result)
    }

    /// 处理所有到期的重试。单条出错只记录日志，不影响其余项。
    pub async fn process_due_retries(&self, now: Timestamp) -> RetrySweepReport {
        let mut report = RetrySweepReport::default();

        for retry in self.queue.drain_due(now).await {
            if self.schedule.is_expired(retry.notification.created_at, now) {
                warn!(
                    notification_id = %retry.notification.id,
                    attempt = retry.attempt,
                    "dropping push retry past maximum age"
                );
                report.expired += 1;
                continue;
            }

            report.attempted += 1;
            let notification_id = retry.notification.id;
            if let Err(err) = self.send_with_retry(retry.notification, retry.attempt).await {
                warn!(notification_id = %notification_id, attempt = retry.attempt, error = %err, "push retry failed");
                report.failed += 1;
            }
        }

        if report.attempted + report.expired > 0 {
            debug!(
                attempted = report.attempted,
                expired = report.expired,
                failed = report.failed,
                "push retry sweep complete"
            );
        }
        report
    }

    /// 以当前时钟执行一轮清扫
    pub async fn run_retry_sweep(&self) -> RetrySweepReport {
        self.process_due_retries(self.clock.now()).await
    }

    /// 通知聊天中的其他成员有新消息，发送者自己的设备除外
    pub async fn send_new_message_notifications(
        &self,
        recipient_ids: &HashSet<UserId>,
        sender_id: UserId,
        sender_username: &str,
        message: &str,
        chat_id: ChatId,
    ) -> Result<PushSendResult, ApplicationError> {
        let user_ids: Vec<UserId> = recipient_ids.iter().copied().collect();
        let devices: Vec<DeviceToken> = self
            .devices
            .find_by_user_ids(&user_ids)
            .await?
            .into_iter()
            .filter(|device| device.user_id != sender_id)
            .collect();

        if devices.is_empty() {
            info!(chat_id = %chat_id, "no device tokens to notify");
            return Ok(PushSendResult::default());
        }

        let data = HashMap::from([
            ("chatId".to_string(), chat_id.to_string()),
            ("type".to_string(), NEW_MESSAGE_TYPE.to_string()),
        ]);
        let notification = PushNotification::new(
            format!("New message from {}", sender_username),
            message,
            chat_id,
            devices,
            data,
            self.clock.now(),
        );

        self.send_with_retry(notification, 0).await
    }

    /// 注册设备令牌。新令牌需先经网关校验；已存在的令牌重新绑定到该用户。
    pub async fn register_device(
        &self,
        user_id: UserId,
        token: &str,
        platform: Platform,
    ) -> Result<DeviceToken, ApplicationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DomainError::validation_error("token", "must not be empty").into());
        }

        if self.devices.find_by_token(token).await?.is_none()
            && !self.gateway.is_valid_token(token, platform).await?
        {
            return Err(DomainError::InvalidDeviceToken.into());
        }

        let device = DeviceToken {
            user_id,
            token: token.to_string(),
            platform,
            created_at: self.clock.now(),
        };
        let saved = self.devices.save(device).await?;
        info!(user_id = %user_id, ?platform, "device registered");
        Ok(saved)
    }

    pub async fn unregister_device(&self, token: &str) -> Result<(), ApplicationError> {
        self.devices.remove(token.trim()).await?;
        debug!("device unregistered");
        Ok(())
    }
}
