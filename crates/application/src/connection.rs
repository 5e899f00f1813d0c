//! 单条实时连接的出站端
//!
//! 注册表只通过 [`ConnectionSink`] 向连接写数据，具体传输（WebSocket、测试桩）由调用方提供。

use async_trait::async_trait;
use thiserror::Error;

/// 关闭连接的原因，映射为协议层的关闭状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 认证失败，不可重试
    AuthenticationFailed,
    /// 服务端内部错误
    ServerError,
    /// 服务关闭
    GoingAway,
}

impl CloseReason {
    /// WebSocket 关闭码
    pub fn code(self) -> u16 {
        match self {
            CloseReason::AuthenticationFailed | CloseReason::ServerError => 1011,
            CloseReason::GoingAway => 1001,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseReason::AuthenticationFailed => "Authentication failed",
            CloseReason::ServerError => "Internal server error",
            CloseReason::GoingAway => "Server shutting down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("send timed out")]
    Timeout,
    #[error("send failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ConnectionSink: Send + Sync {
    fn is_open(&self) -> bool;

    /// 投递一帧已序列化的文本。实现方负责限制写入耗时。
    async fn send(&self, frame: &str) -> Result<(), DeliveryError>;

    async fn close(&self, reason: CloseReason);
}
