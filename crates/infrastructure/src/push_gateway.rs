//! 推送网关适配器
//!
//! `HttpPushGateway` 对每个设备发送一次 JSON POST，按状态码划分结果；
//! 未配置推送端点时使用 `LoggingPushGateway`，只记录日志。

use std::time::Duration;

use application::{PushError, PushGateway};
use async_trait::async_trait;
use domain::{Platform, PushMessage, PushOutcome};
use futures_util::future::join_all;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequest<'a> {
    token: &'a str,
    platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<GatewayNotification<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collapse_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a std::collections::HashMap<String, String>>,
    validate_only: bool,
}

#[derive(Debug, Serialize)]
struct GatewayNotification<'a> {
    title: &'a str,
    body: &'a str,
}

/// 状态码到推送结果的映射
pub fn classify_status(status: StatusCode) -> PushOutcome {
    match status.as_u16() {
        200..=299 => PushOutcome::Succeeded,
        400 | 403 | 404 | 410 => PushOutcome::PermanentFailure,
        _ => PushOutcome::TemporaryFailure,
    }
}

pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn post(&self, request: &GatewayRequest<'_>) -> PushOutcome {
        match self.client.post(&self.endpoint).json(request).send().await {
            Ok(response) => {
                let outcome = classify_status(response.status());
                if outcome != PushOutcome::Succeeded {
                    debug!(status = %response.status(), ?outcome, "push gateway rejected message");
                }
                outcome
            }
            Err(err) => {
                warn!(error = %err, "push gateway request failed");
                PushOutcome::TemporaryFailure
            }
        }
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushOutcome>, PushError> {
        let requests: Vec<GatewayRequest<'_>> = messages
            .iter()
            .map(|message| GatewayRequest {
                token: &message.token,
                platform: message.platform,
                notification: Some(GatewayNotification {
                    title: &message.title,
                    body: &message.body,
                }),
                collapse_key: Some(&message.collapse_key),
                data: Some(&message.data),
                validate_only: false,
            })
            .collect();

        Ok(join_all(requests.iter().map(|request| self.post(request))).await)
    }

    async fn is_valid_token(&self, token: &str, platform: Platform) -> Result<bool, PushError> {
        let request = GatewayRequest {
            token,
            platform,
            notification: None,
            collapse_key: None,
            data: None,
            validate_only: true,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| PushError::unavailable(e.to_string()))?;

        match classify_status(response.status()) {
            PushOutcome::Succeeded => Ok(true),
            PushOutcome::PermanentFailure => Ok(false),
            PushOutcome::TemporaryFailure => Err(PushError::unavailable(format!(
                "token validation returned {}",
                response.status()
            ))),
        }
    }
}

/// 无推送端点时的替代实现，所有消息视为成功
#[derive(Debug, Default)]
pub struct LoggingPushGateway;

#[async_trait]
impl PushGateway for LoggingPushGateway {
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushOutcome>, PushError> {
        for message in messages {
            info!(platform = ?message.platform, title = %message.title, "push notification (not sent, no endpoint configured)");
        }
        Ok(vec![PushOutcome::Succeeded; messages.len()])
    }

    async fn is_valid_token(&self, token: &str, _platform: Platform) -> Result<bool, PushError> {
        Ok(!token.is_empty())
    }
}
