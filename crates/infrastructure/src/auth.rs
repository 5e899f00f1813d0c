//! JWT令牌校验
//!
//! HS256 对称签名，只接受 `type = "access"` 的令牌，`sub` 为用户UUID。

use application::{bearer_credential, AuthError, TokenVerifier};
use chrono::{Duration, Utc};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

pub struct JwtTokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiration_minutes: i64,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str, expiration_minutes: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiration_minutes,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(&config.secret, config.expiration_minutes)
    }

    /// 签发访问令牌
    pub fn issue_access_token(&self, user_id: UserId) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.expiration_minutes)).timestamp(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(format!("failed to encode token: {}", e)))
    }
}

impl TokenVerifier for JwtTokenVerifier {
    fn verify(&self, raw_token: &str) -> Result<UserId, AuthError> {
        let token = bearer_credential(raw_token).ok_or(AuthError::MissingCredential)?;

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AuthError::InvalidToken(format!(
                "unexpected token type '{}'",
                data.claims.token_type
            )));
        }

        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::InvalidToken("subject is not a user id".to_string()))?;
        debug!(user_id = %user_id, "token verified");
        Ok(user_id)
    }
}
