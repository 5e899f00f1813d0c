use std::sync::Arc;
use std::time::Duration;

use application::{ConnectionRegistry, PushNotificationService, RetrySchedule};
use config::AppConfig;
use domain::{ChatId, UserId};
use infrastructure::Infrastructure;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::sleep;
use uuid::Uuid;
use web_api::{router, AppState};

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub infra: Infrastructure,
    pub registry: Arc<ConnectionRegistry>,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token_for(&self, user_id: UserId) -> String {
        self.infra
            .token_verifier
            .issue_access_token(user_id)
            .expect("issue token")
    }

    /// 等待注册表中出现指定数量的连接
    pub async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..200 {
            if self.registry.connection_count().await == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} connections", expected);
    }
}

pub fn new_user() -> UserId {
    UserId::from(Uuid::new_v4())
}

pub fn new_chat() -> ChatId {
    ChatId::from(Uuid::new_v4())
}

pub async fn spawn_server() -> TestServer {
    let config = AppConfig::default();
    let infra = Infrastructure::from_config(&config).expect("infrastructure");

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
    let state = AppState::new(
        registry.clone(),
        push_service,
        infra.token_verifier.clone(),
        config.websocket.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(state);

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        infra,
        registry,
        _shutdown: shutdown_tx,
    }
}
