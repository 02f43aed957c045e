//! 基于 Redis Streams 的发布/订阅（relay-redis）
//!
//! 实现 `relay_core::pubsub` 的 `Publisher`/`Subscriber` 契约：
//! - 发布：按事件名路由到流，`XADD MAXLEN ~` 近似限长追加；
//! - 订阅：消费组初始化、`XREADGROUP` 批量读取、有限次重试与无条件确认；
//! - 失败恢复：按节奏 `XAUTOCLAIM` 认领被遗弃的待处理条目；
//! - 配置：TOML 文件加载与环境变量替换。
//!
//! 需要 Redis >= 6.2（`XAUTOCLAIM`）。
//!
pub mod broker;
pub mod config;
mod consumer;
pub mod publisher;
pub mod recovery;
pub mod settings;
pub mod stream;
pub mod subscriber;

pub use broker::{AutoClaimed, EVENT_FIELD, GroupCreation, RedisBroker, StreamBroker, StreamEntry};
pub use config::{FailureRecovery, StartFrom, SubscriberConfig};
pub use publisher::RedisPublisher;
pub use recovery::RecoveryHandle;
pub use settings::{ConfigError, RedisSettings};
pub use stream::{DEFAULT_STREAM_CAPACITY, Stream, StreamRouter, streams_for_subscriber};
pub use subscriber::RedisSubscriber;
