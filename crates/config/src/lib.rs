//! 统一配置中心
//!
//! 提供实时服务的全局配置管理，包括：
//! - 监听地址
//! - JWT认证
//! - WebSocket 出站队列
//! - 推送通知重试策略
//!
//! 加载优先级：默认值 -> 可选配置文件 (APP_CONFIG_FILE) -> 环境变量 (APP_*)

use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// WebSocket 配置
    #[serde(default)]
    pub websocket: WebSocketConfig,
    /// 推送通知配置
    #[serde(default)]
    pub push: PushConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_minutes: i64,
}

/// WebSocket 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// 每条连接出站队列的容量
    pub outbound_buffer: usize,
    /// 单次投递写入队列的超时（毫秒），防止慢消费者堆积
    pub send_timeout_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            send_timeout_ms: 5_000,
        }
    }
}

impl WebSocketConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// 推送通知配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    /// 推送网关地址，未配置时只记录日志不实际推送
    pub endpoint: Option<String>,
    pub request_timeout_secs: u64,
    /// 按尝试次数索引的退避表（秒）
    pub retry_delays_secs: Vec<u64>,
    pub max_retry_age_minutes: i64,
    pub sweep_interval_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_secs: 10,
            retry_delays_secs: vec![30, 60, 120, 300, 600],
            max_retry_age_minutes: 30,
            sweep_interval_secs: 15,
        }
    }
}

impl PushConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    /// 注意：生产环境必须通过 APP_JWT__SECRET 覆盖密钥
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            jwt: JwtConfig {
                secret: "dev-secret-key-not-for-production-use-minimum-32-chars".into(),
                expiration_minutes: 15,
            },
            websocket: WebSocketConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按优先级加载配置并校验
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            fig = merge_file(fig, &path);
        }
        Self::from_figment(fig.merge(Env::prefixed("APP_").split("__")))
    }

    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "port must be greater than 0".to_string(),
            ));
        }

        // 至少256位/32字节
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.jwt.expiration_minutes <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration must be positive".to_string(),
            ));
        }

        if self.websocket.outbound_buffer == 0 {
            return Err(ConfigError::InvalidWebSocketConfig(
                "outbound buffer must be greater than 0".to_string(),
            ));
        }

        if self.push.retry_delays_secs.is_empty() {
            return Err(ConfigError::InvalidPushConfig(
                "retry delay table cannot be empty".to_string(),
            ));
        }

        if self.push.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidPushConfig(
                "sweep interval must be greater than 0".to_string(),
            ));
        }

        if self.push.max_retry_age_minutes <= 0 {
            return Err(ConfigError::InvalidPushConfig(
                "max retry age must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn merge_file(fig: Figment, path: &str) -> Figment {
    if path.ends_with(".yml") || path.ends_with(".yaml") {
        fig.merge(Yaml::file(path))
    } else if path.ends_with(".json") {
        fig.merge(Json::file(path))
    } else {
        fig.merge(Toml::file(path))
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid JWT configuration: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid websocket configuration: {0}")]
    InvalidWebSocketConfig(String),
    #[error("Invalid push configuration: {0}")]
    InvalidPushConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.push.retry_delays_secs, vec![30, 60, 120, 300, 600]);
        assert_eq!(config.push.max_retry_age_minutes, 30);
        assert_eq!(config.push.sweep_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();

        // 测试无效JWT密钥长度
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.push.retry_delays_secs.clear();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("retry delay table"));

        config = AppConfig::default();
        config.websocket.outbound_buffer = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.push.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_and_file_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "app.toml",
                r#"
                [push]
                retry_delays_secs = [1, 2]
                max_retry_age_minutes = 5
                request_timeout_secs = 3
                sweep_interval_secs = 1
                "#,
            )?;
            jail.set_env("APP_SERVER__PORT", "9090");

            let fig = Figment::new()
                .merge(Serialized::defaults(AppConfig::default()))
                .merge(Toml::file("app.toml"))
                .merge(Env::prefixed("APP_").split("__"));
            let config = AppConfig::from_figment(fig).expect("config");

            assert_eq!(config.server.port, 9090);
            assert_eq!(config.push.retry_delays_secs, vec![1, 2]);
            assert_eq!(config.push.max_retry_age_minutes, 5);
            assert_eq!(config.websocket, WebSocketConfig::default());
            Ok(())
        });
    }
}
