//! relay 基础库（relay-core）
//!
//! 提供服务间通用的横切构件，用于在应用中实现：
//! - 执行上下文（`context`）：取消信号、截止时间与关联 ID 等执行信息
//! - 键值对（`kv`）：日志、错误与观测共用的结构化字段
//! - 结构化错误（`error`）：携带分类与标签的错误类型
//! - 可观测性（`o11y`）：可插拔的 Span/Agent 抽象（noop / tracing / memory）
//! - 日志门面（`logger`，需开启 `logger` 特性）与优雅停机（`halt`）
//! - 发布/订阅（`pubsub`）：事件信封、处理器契约、重试引擎与内存实现
//!
//! 具体的消息中间件（如 Redis Streams）由上层 crate 基于 `pubsub` 的契约实现。
//!
pub mod context;
pub mod error;
pub mod halt;
pub mod kv;
#[cfg(feature = "logger")]
pub mod logger;
pub mod o11y;
pub mod pubsub;

pub use context::Context;
pub use error::{Category, Error, Result};
pub use kv::Pair;
