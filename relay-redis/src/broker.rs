//! 流代理（StreamBroker）
//!
//! 对订阅/发布所需的 Redis Streams 命令做类型化封装，将协议解析与重试逻辑隔离：
//! - `create_group`：`XGROUP CREATE ... MKSTREAM`，组已存在视为成功；
//! - `read_group`：`XREADGROUP ... COUNT n BLOCK ms STREAMS s1..sn > ..>`；
//! - `auto_claim`：`XAUTOCLAIM stream group consumer idle 0-0 COUNT n`；
//! - `ack`：`XACK`；
//! - `append`：`XADD stream MAXLEN ~ capacity * event <json>`。
//!
//! 传输层错误统一映射为 `Category::Transient`。
//!
use crate::config::StartFrom;
use async_trait::async_trait;
use deadpool_redis::redis::streams::{
    StreamAutoClaimReply, StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply,
};
use deadpool_redis::redis::{AsyncCommands, RedisError, cmd};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use relay_core::{Category, Error, Result};
use std::time::Duration;
use tracing::debug;

/// 事件在流条目中的字段名
pub const EVENT_FIELD: &str = "event";

/// 流中的一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// 所属流
    pub stream: String,
    /// 条目 ID（如 `1700000000000-0`）
    pub id: String,
    /// `event` 字段的原始内容；缺失时为 None
    pub payload: Option<Vec<u8>>,
}

/// `XAUTOCLAIM` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoClaimed {
    /// 下一次扫描的起始 ID（`0-0` 表示已扫描完整个待处理列表）
    pub next_start_id: String,
    pub entries: Vec<StreamEntry>,
}

/// 消费组创建结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    AlreadyExists,
}

/// 类型化的流命令接口
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// 创建消费组（流不存在时一并创建）
    async fn create_group(&self, stream: &str, group: &str, start: StartFrom)
    -> Result<GroupCreation>;

    /// 读取分配给该消费者的新条目，最多阻塞 `block`；超时返回空列表
    async fn read_group(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// 认领空闲至少 `min_idle` 的待处理条目
    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<AutoClaimed>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    /// 追加条目并近似裁剪到 `capacity`，返回条目 ID
    async fn append(&self, stream: &str, capacity: usize, payload: &[u8]) -> Result<String>;
}

fn transport(command: &str, err: RedisError) -> Error {
    Error::wrap(format!("redis {command}"), err).with_category(Category::Transient)
}

fn into_entry(stream: &str, id: StreamId) -> StreamEntry {
    StreamEntry {
        stream: stream.to_string(),
        payload: id.get::<Vec<u8>>(EVENT_FIELD),
        id: id.id,
    }
}

/// 基于 deadpool-redis 连接池的实现；每条命令使用独立的池化连接，
/// 阻塞读取不会拖住确认与认领
#[derive(Clone)]
pub struct RedisBroker {
    pool: Pool,
}

impl RedisBroker {
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                Error::wrap("redis pool", e)
                    .with_category(Category::Invalid)
                    .with_category(Category::Permanent)
            })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::wrap("redis connection", e).with_category(Category::Transient))
    }
}

#[async_trait]
impl StreamBroker for RedisBroker {
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartFrom,
    ) -> Result<GroupCreation> {
        let mut conn = self.conn().await?;
        let created: std::result::Result<(), RedisError> = conn
            .xgroup_create_mkstream(stream, group, start.as_id())
            .await;

        match created {
            Ok(()) => Ok(GroupCreation::Created),
            Err(e) if e.code() == Some("BUSYGROUP") || e.to_string().contains("BUSYGROUP") => {
                Ok(GroupCreation::AlreadyExists)
            }
            Err(e) => Err(transport("xgroup create", e)),
        }
    }

    async fn read_group(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn().await?;
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let ids = vec![">"; streams.len()];

        let reply: Option<StreamReadReply> = conn
            .xread_options(streams, ids.as_slice(), &opts)
            .await
            .map_err(|e| transport("xreadgroup", e))?;

        let entries: Vec<StreamEntry> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| {
                let stream = key.key;
                key.ids
                    .into_iter()
                    .map(move |id| into_entry(&stream, id))
                    .collect::<Vec<_>>()
            })
            .collect();

        if !entries.is_empty() {
            debug!(group, consumer, count = entries.len(), "redis entries read");
        }
        Ok(entries)
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<AutoClaimed> {
        let mut conn = self.conn().await?;
        let reply: StreamAutoClaimReply = cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| transport("xautoclaim", e))?;

        Ok(AutoClaimed {
            next_start_id: reply.next_stream_id,
            entries: reply
                .claimed
                .into_iter()
                .map(|id| into_entry(stream, id))
                .collect(),
        })
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .xack(stream, group, &[id])
            .await
            .map_err(|e| transport("xack", e))?;
        Ok(())
    }

    async fn append(&self, stream: &str, capacity: usize, payload: &[u8]) -> Result<String> {
        let mut conn = self.conn().await?;
        conn.xadd_maxlen(
            stream,
            StreamMaxlen::Approx(capacity),
            "*",
            &[(EVENT_FIELD, payload.to_vec())],
        )
        .await
        .map_err(|e| transport("xadd", e))
    }
}
