//! 应用层实现。
//!
//! 实时连接注册表与扇出、聊天事件分发、推送通知及其重试调度。
//! 外部协作方（令牌校验、聊天目录、消息存储、推送网关、设备令牌存储）
//! 均以 trait 形式注入。

pub mod broadcaster;
pub mod clock;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod local_broadcast;
pub mod push;
pub mod registry;
pub mod repository;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcaster::{BroadcastError, EventPublisher};
pub use clock::{Clock, SystemClock};
pub use connection::{CloseReason, ConnectionSink, DeliveryError};
pub use dispatcher::RealtimeEventDispatcher;
pub use error::{ApplicationError, AuthError};
pub use local_broadcast::{EventStream, LocalEventBus};
pub use push::{
    spawn_retry_sweeper, NotificationEventListener, PendingRetry, PushError, PushGateway,
    PushNotificationService, RetryQueue, RetrySchedule, RetrySweepReport,
};
pub use registry::{ConnectionRegistry, DeliveryReport, InboundOutcome, Registration, RegistryError};
pub use repository::{bearer_credential, ChatDirectory, DeviceTokenStore, MessageStore, TokenVerifier};
