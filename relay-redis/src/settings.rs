//! 配置加载（RedisSettings）
//!
//! 从 TOML 文件加载连接、订阅与发布配置，支持 `${VAR}` 环境变量替换：
//!
//! ```toml
//! [redis]
//! url = "${REDIS_URL}"
//!
//! [subscriber]
//! group_id = "orders-service"
//! streams = ["orders"]
//! max_attempts = 3
//! consume_timeout_ms = 2000
//! failure_recovery = { enabled = true, cadence_ms = 5000 }
//!
//! [[publisher.streams]]
//! name = "orders"
//! events = ["order.created"]
//! capacity = 100000
//! ```
//!
use crate::broker::RedisBroker;
use crate::config::{FailureRecovery, StartFrom, SubscriberConfig};
use crate::stream::{Stream, streams_for_subscriber};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const ENV_PLACEHOLDER: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// 配置根
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisSettings {
    #[serde(default)]
    pub redis: ConnectionSettings,

    #[serde(default)]
    pub subscriber: Option<SubscriberSettings>,

    #[serde(default)]
    pub publisher: PublisherSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// 订阅者配置段
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriberSettings {
    pub group_id: String,

    pub streams: Vec<String>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_read_capacity")]
    pub read_capacity: usize,

    #[serde(default = "default_timeout_ms")]
    pub consume_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub read_block_ms: u64,

    #[serde(default)]
    pub start_from: StartFrom,

    #[serde(default)]
    pub failure_recovery: FailureRecoverySettings,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_read_capacity() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct FailureRecoverySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_timeout_ms")]
    pub cadence_ms: u64,
}

impl Default for FailureRecoverySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cadence_ms: default_timeout_ms(),
        }
    }
}

impl SubscriberSettings {
    /// 转换为订阅者配置（已收敛到合法范围）
    pub fn config(&self) -> SubscriberConfig {
        SubscriberConfig {
            max_attempts: self.max_attempts,
            read_capacity: self.read_capacity,
            consume_timeout: Duration::from_millis(self.consume_timeout_ms),
            read_block: Duration::from_millis(self.read_block_ms),
            start_from: self.start_from,
            failure_recovery: FailureRecovery {
                enabled: self.failure_recovery.enabled,
                cadence: Duration::from_millis(self.failure_recovery.cadence_ms),
            },
        }
        .normalized()
    }

    pub fn streams(&self) -> Vec<Stream> {
        streams_for_subscriber(&self.streams)
    }
}

/// 发布者配置段
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PublisherSettings {
    #[serde(default)]
    pub streams: Vec<StreamSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    pub name: String,

    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default)]
    pub capacity: Option<usize>,
}

impl PublisherSettings {
    pub fn streams(&self) -> Vec<Stream> {
        self.streams
            .iter()
            .map(|s| {
                let stream = Stream::for_publisher(&s.name, &s.events);
                match s.capacity {
                    Some(capacity) => stream.capped_at(capacity),
                    None => stream,
                }
            })
            .collect()
    }
}

impl RedisSettings {
    /// 从 `RELAY_CONFIG` 指定的路径（默认 `config/relay.toml`）加载
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/relay.toml".to_string());
        Self::load_from(&path)
    }

    /// 文件不存在时返回默认配置
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        info!(path = %path.display(), "loading configuration");
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// 解析 TOML 文本（先做环境变量替换）
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content, |name| env::var(name).ok())?;
        let settings: RedisSettings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.url.contains("${") {
            return Err(ConfigError::Validation(format!(
                "redis url contains an unset environment variable: {}",
                self.redis.url
            )));
        }

        if let Some(sub) = &self.subscriber {
            if sub.group_id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "subscriber group_id must not be empty".to_string(),
                ));
            }
            if sub.streams.is_empty() {
                return Err(ConfigError::Validation(
                    "subscriber requires at least one stream".to_string(),
                ));
            }
        }

        for stream in &self.publisher.streams {
            if stream.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "publisher stream name must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// 按 `[redis] url` 创建连接池
    pub fn broker(&self) -> relay_core::Result<RedisBroker> {
        RedisBroker::from_url(self.redis.url.clone())
    }
}

/// 替换 `${VAR}` 占位符；`lookup` 返回 None 时保留原样
fn substitute_env_vars<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(ENV_PLACEHOLDER)?;

    let replaced = re.replace_all(content, |caps: &Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            debug!(var = %name, "environment variable not set, keeping placeholder");
            caps[0].to_string()
        })
    });
    Ok(replaced.into_owned())
}
