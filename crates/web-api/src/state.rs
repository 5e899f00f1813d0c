use std::sync::Arc;

use application::{ConnectionRegistry, PushNotificationService, TokenVerifier};
use config::WebSocketConfig;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub push_service: Arc<PushNotificationService>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub websocket: WebSocketConfig,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        push_service: Arc<PushNotificationService>,
        token_verifier: Arc<dyn TokenVerifier>,
        websocket: WebSocketConfig,
    ) -> Self {
        Self {
            registry,
            push_service,
            token_verifier,
            websocket,
        }
    }
}
