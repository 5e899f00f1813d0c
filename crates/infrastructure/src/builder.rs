use std::sync::Arc;

use application::{Clock, LocalEventBus, PushError, PushGateway, SystemClock};
use config::AppConfig;
use thiserror::Error;
use tracing::info;

use crate::{
    auth::JwtTokenVerifier,
    push_gateway::{HttpPushGateway, LoggingPushGateway},
    repository::{MemoryChatDirectory, MemoryDeviceTokenStore, MemoryMessageStore},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("push gateway error: {0}")]
    PushGateway(#[from] PushError),
}

/// 进程内使用的全部适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub clock: Arc<dyn Clock>,
    pub event_bus: Arc<LocalEventBus>,
    pub directory: Arc<MemoryChatDirectory>,
    pub message_store: Arc<MemoryMessageStore>,
    pub device_tokens: Arc<MemoryDeviceTokenStore>,
    pub token_verifier: Arc<JwtTokenVerifier>,
    pub push_gateway: Arc<dyn PushGateway>,
}

impl Infrastructure {
    pub fn from_config(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let event_bus = Arc::new(LocalEventBus::new());
        let directory = Arc::new(MemoryChatDirectory::new(event_bus.clone()));
        let message_store = Arc::new(MemoryMessageStore::new(
            directory.clone(),
            event_bus.clone(),
            clock.clone(),
        ));

        let push_gateway: Arc<dyn PushGateway> = match &config.push.endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "using HTTP push gateway");
                Arc::new(HttpPushGateway::new(
                    endpoint.clone(),
                    config.push.request_timeout(),
                )?)
            }
            None => {
                info!("no push endpoint configured, push notifications are logged only");
                Arc::new(LoggingPushGateway)
            }
        };

        Ok(Self {
            clock,
            event_bus,
            directory,
            message_store,
            device_tokens: Arc::new(MemoryDeviceTokenStore::new()),
            token_verifier: Arc::new(JwtTokenVerifier::from_config(&config.jwt)),
            push_gateway,
        })
    }
}
