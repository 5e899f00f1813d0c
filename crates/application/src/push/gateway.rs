use async_trait::async_trait;
use domain::{Platform, PushMessage, PushOutcome};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("push gateway unavailable: {0}")]
    Unavailable(String),
}

impl PushError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        PushError::Unavailable(message.into())
    }
}

/// 推送网关
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// 批量推送。返回的结果按下标与 `messages` 一一对应，
    /// 结果少于消息数时，缺失部分按临时失败处理。
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushOutcome>, PushError>;

    /// 注册前校验设备令牌（不实际推送）
    async fn is_valid_token(&self, token: &str, platform: Platform) -> Result<bool, PushError>;
}
