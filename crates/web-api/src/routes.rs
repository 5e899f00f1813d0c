use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use domain::{DeviceToken, Platform};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{
    auth::{authorization_header, AuthenticatedUser},
    error::ApiError,
    state::AppState,
    ws_connection::serve_connection,
};

#[derive(Debug, Deserialize)]
struct WebSocketQuery {
    /// 浏览器无法设置 Authorization 头时的备用参数
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterDevicePayload {
    token: String,
    platform: Platform,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceResponse {
    token: String,
    platform: Platform,
    user_id: String,
}

impl From<DeviceToken> for DeviceResponse {
    fn from(device: DeviceToken) -> Self {
        Self {
            token: device.token,
            platform: device.platform,
            user_id: device.user_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    pending_push_retries: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/devices", post(register_device))
        .route("/devices/{token}", delete(unregister_device))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.registry.connection_count().await,
        pending_push_retries: state.push_service.queue().len().await,
    })
}

async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WebSocketQuery>,
) -> Response {
    let auth_header = authorization_header(&headers).or(query.token);
    ws.on_upgrade(move |socket| serve_connection(socket, state, auth_header))
}

async fn register_device(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(payload): Json<RegisterDevicePayload>,
) -> Result<(StatusCode, Json<DeviceResponse>), ApiError> {
    let device = state
        .push_service
        .register_device(user_id, &payload.token, payload.platform)
        .await?;

    Ok((StatusCode::CREATED, Json(device.into())))
}

async fn unregister_device(
    State(state): State<AppState>,
    AuthenticatedUser(_): AuthenticatedUser,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    if token.trim().is_empty() {
        return Err(ApiError::bad_request("token must not be empty"));
    }
    state.push_service.unregister_device(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}
