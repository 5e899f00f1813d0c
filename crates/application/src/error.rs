use domain::DomainError;
use thiserror::Error;

use crate::broadcaster::BroadcastError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("push error: {0}")]
    Push(#[from] crate::push::PushError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}

/// 建立连接时的认证失败，对该次连接是终态
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing authorization credential")]
    MissingCredential,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}
