//! 基础设施层实现。
//!
//! 提供令牌校验、内存存储与推送网关等适配器，实现应用层定义的接口。

pub mod auth;
pub mod builder;
pub mod push_gateway;
pub mod repository;

pub use auth::{Claims, JwtTokenVerifier};
pub use builder::{Infrastructure, InfrastructureError};
pub use push_gateway::{classify_status, HttpPushGateway, LoggingPushGateway};
pub use repository::{MemoryChatDirectory, MemoryDeviceTokenStore, MemoryMessageStore};
