//! 实时服务入口
//!
//! 加载配置，装配注册表、事件消费者与推送重试清扫任务，然后启动 Axum 服务。

use std::sync::Arc;

use application::{
    spawn_retry_sweeper, ConnectionRegistry, EventStream, NotificationEventListener,
    PushNotificationService, RealtimeEventDispatcher, RetrySchedule,
};
use config::AppConfig;
use domain::EventEnvelope;
use infrastructure::Infrastructure;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    let infra = Infrastructure::from_config(&config)?;

    let registry = Arc::new(ConnectionRegistry::new(
        infra.token_verifier.clone(),
        infra.directory.clone(),
        infra.message_store.clone(),
    ));
    let push_service = Arc::new(PushNotificationService::new(
        infra.push_gateway.clone(),
        infra.device_tokens.clone(),
        infra.clock.clone(),
        RetrySchedule::from_config(&config.push),
    ));

    let shutdown = CancellationToken::new();

    // 实时投递与推送各自订阅事件总线，互不阻塞
    let dispatcher = Arc::new(RealtimeEventDispatcher::new(
        registry.clone(),
        infra.directory.clone(),
    ));
    let realtime_consumer = spawn_consumer(
        "realtime",
        infra.event_bus.subscribe(),
        shutdown.clone(),
        move |envelope| {
            let dispatcher = dispatcher.clone();
            async move {
                if let Err(err) = dispatcher.handle(&envelope.event).await {
                    tracing::warn!(event_id = %envelope.event_id, error = %err, "realtime dispatch failed");
                }
            }
        },
    );

    let listener = Arc::new(NotificationEventListener::new(push_service.clone()));
    let push_consumer = spawn_consumer(
        "push",
        infra.event_bus.subscribe(),
        shutdown.clone(),
        move |envelope| {
            let listener = listener.clone();
            async move { listener.handle(&envelope.event).await }
        },
    );

    let sweeper = spawn_retry_sweeper(
        push_service.clone(),
        config.push.sweep_interval(),
        shutdown.clone(),
    );

    let state = AppState::new(
        registry.clone(),
        push_service,
        infra.token_verifier.clone(),
        config.websocket.clone(),
    );
    let app = router(state);

    let bind_address = config.bind_address();
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("实时服务启动在 http://{}", bind_address);

    let server_shutdown = shutdown.clone();
    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received shutdown signal");
                }
                _ = server_shutdown.cancelled() => {}
            }
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    registry.shutdown().await;
    for task in [realtime_consumer, push_consumer, sweeper] {
        let _ = task.await;
    }
    tracing::info!("实时服务已停止");

    Ok(())
}

/// 持续消费事件流直到取消或总线关闭
fn spawn_consumer<F, Fut>(
    name: &'static str,
    mut events: EventStream,
    shutdown: CancellationToken,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(EventEnvelope) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(envelope) => handler(envelope).await,
                    None => break,
                },
            }
        }
        tracing::debug!(consumer = name, "event consumer stopped");
    })
}
