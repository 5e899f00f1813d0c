//! 从请求中提取并校验访问令牌

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use domain::UserId;

use crate::{error::ApiError, state::AppState};

/// 读取 Authorization 头的原始值
pub fn authorization_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// 已认证的调用方
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub UserId);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = authorization_header(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;
        let user_id = state.token_verifier.verify(&header)?;
        Ok(AuthenticatedUser(user_id))
    }
}
