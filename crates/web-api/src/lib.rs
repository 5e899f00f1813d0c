//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 升级交给连接注册表，设备注册交给推送服务。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::AuthenticatedUser;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use ws_connection::{serve_connection, ChannelSink};
