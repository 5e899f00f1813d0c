//! 推送通知与重试调度

pub mod gateway;
pub mod listener;
pub mod retry;
pub mod service;
pub mod sweeper;

pub use gateway::{PushError, PushGateway};
pub use listener::NotificationEventListener;
pub use retry::{PendingRetry, RetryQueue, RetrySchedule};
pub use service::{PushNotificationService, RetrySweepReport, NEW_MESSAGE_TYPE};
pub use sweeper::spawn_retry_sweeper;
