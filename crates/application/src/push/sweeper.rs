use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::push::service::PushNotificationService;

/// 启动周期性的重试清扫任务，`shutdown` 取消后退出
pub fn spawn_retry_sweeper(
    service: Arc<PushNotificationService>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = period.as_secs(), "push retry sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    service.run_retry_sweep().await;
                }
            }
        }

        tracing::info!("push retry sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::push::gateway::{PushError, PushGateway};
    use crate::push::retry::{PendingRetry, RetrySchedule};
    use crate::repository::DeviceTokenStore;
    use crate::error::ApplicationError;
    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{ChatId, DeviceToken, Platform, PushMessage, PushNotification, PushOutcome, UserId};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct CountingGateway {
        batches: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for CountingGateway {
        async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushOutcome>, PushError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![PushOutcome::Succeeded; messages.len()])
        }

        async fn is_valid_token(&self, _token: &str, _platform: Platform) -> Result<bool, PushError> {
            Ok(true)
        }
    }

    struct NoDevices;

    #[async_trait]
    impl DeviceTokenStore for NoDevices {
        async fn find_by_user_ids(&self, _: &[UserId]) -> Result<Vec<DeviceToken>, ApplicationError> {
            Ok(Vec::new())
        }

        async fn find_by_token(&self, _: &str) -> Result<Option<DeviceToken>, ApplicationError> {
            Ok(None)
        }

        async fn save(&self, device: DeviceToken) -> Result<DeviceToken, ApplicationError> {
            Ok(device)
        }

        async fn remove(&self, _: &str) -> Result<(), ApplicationError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sweeper_delivers_due_retries_and_stops_on_cancel() {
        let gateway = Arc::new(CountingGateway::default());
        let service = Arc::new(PushNotificationService::new(
            gateway.clone(),
            Arc::new(NoDevices),
            Arc::new(SystemClock),
            RetrySchedule::default(),
        ));

        let now = Utc::now();
        let device = DeviceToken {
            user_id: UserId::from(Uuid::new_v4()),
            token: "t".into(),
            platform: Platform::Android,
            created_at: now,
        };
        service
            .queue()
            .push(PendingRetry {
                notification: PushNotification::new(
                    "title",
                    "body",
                    ChatId::from(Uuid::new_v4()),
                    vec![device],
                    HashMap::new(),
                    now,
                ),
                attempt: 1,
                execute_at: now,
            })
            .await;

        let shutdown = CancellationToken::new();
        let handle = spawn_retry_sweeper(service.clone(), Duration::from_millis(10), shutdown.clone());

        for _ in 0..100 {
            if service.queue().is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert!(service.queue().is_empty().await);
        assert_eq!(gateway.batches.load(Ordering::SeqCst), 1);
    }
}
