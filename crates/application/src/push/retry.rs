//! 推送重试队列
//!
//! 待重试项按执行时间（毫秒）分桶存放在有序表中，
//! 任意数量的生产者可并发入队，清扫任务一次性取出所有到期的桶。

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use config::PushConfig;
use domain::{PushNotification, Timestamp};
use tokio::sync::Mutex;

/// 退避表与年龄上限
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
    max_age: ChronoDuration,
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>, max_age: ChronoDuration) -> Self {
        Self { delays, max_age }
    }

    pub fn from_config(config: &PushConfig) -> Self {
        Self::new(
            config
                .retry_delays_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            ChronoDuration::minutes(config.max_retry_age_minutes),
        )
    }

    /// 第 `attempt` 次（从0开始）失败后是否还能再排一次重试
    pub fn allows_retry(&self, attempt: u32) -> bool {
        (attempt as usize) < self.delays.len()
    }

    /// 第 `index` 项延迟，超出表长时取最后一项
    pub fn delay_for(&self, index: u32) -> Duration {
        self.delays
            .get(index as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }

    pub fn max_age(&self) -> ChronoDuration {
        self.max_age
    }

    pub fn is_expired(&self, created_at: Timestamp, now: Timestamp) -> bool {
        now - created_at > self.max_age
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_config(&PushConfig::default())
    }
}

/// 一条待执行的推送重试
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRetry {
    /// 只包含上次临时失败的设备
    pub notification: PushNotification,
    /// 从1开始
    pub attempt: u32,
    pub execute_at: Timestamp,
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    buckets: Mutex<BTreeMap<i64, Vec<PendingRetry>>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, retry: PendingRetry) {
        let key = retry.execute_at.timestamp_millis();
        self.buckets.lock().await.entry(key).or_default().push(retry);
    }

    /// 取出执行时间不晚于 `now` 的全部重试项，按执行时间排序
    pub async fn drain_due(&self, now: Timestamp) -> Vec<PendingRetry> {
        let mut buckets = self.buckets.lock().await;
        let pending = buckets.split_off(&(now.timestamp_millis() + 1));
        let due = std::mem::replace(&mut *buckets, pending);
        due.into_values().flatten().collect()
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.buckets.lock().await.is_empty()
    }

    /// 当前所有待重试项的快照
    pub async fn snapshot(&self) -> Vec<PendingRetry> {
        self.buckets
            .lock()
            .await
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}
