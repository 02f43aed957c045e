use crate::context::Context;
use crate::error::{Category, Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

fn encode_error(err: serde_json::Error) -> Error {
    Error::wrap("encode event", err)
        .with_category(Category::Encode)
        .with_category(Category::Permanent)
}

/// 事件元数据：创建时从上下文采集，仅 `attempts` 会在处理过程中变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// 事件创建时间（UTC）
    created_at_utc: DateTime<Utc>,
    /// 请求关联 ID
    #[serde(default)]
    correlation_id: String,
    /// 已处理次数，由重试引擎递增
    #[serde(default)]
    attempts: u32,
    /// 是否为演练执行
    #[serde(default)]
    is_dry_run: bool,
}

impl Meta {
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        self.created_at_utc
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_dry_run(&self) -> bool {
        self.is_dry_run
    }
}

/// 事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识，用于幂等与追踪
    id: String,
    /// 事件名称（类型），如 `order.created`
    name: String,
    /// 执行信息
    meta: Meta,
    /// 事件载荷（原始 JSON）
    #[serde(default)]
    payload: Value,
}

impl Event {
    /// 基于上下文创建事件：生成唯一 ID，采集关联 ID 与演练标记
    pub fn new<T>(ctx: &Context, name: impl Into<String>, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload).map_err(encode_error)?;
        Ok(Self::from_value(ctx, name, payload))
    }

    /// 以已编码的 JSON 载荷创建事件
    pub fn from_value(ctx: &Context, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            meta: Meta {
                created_at_utc: Utc::now(),
                correlation_id: ctx.correlation_id().unwrap_or_default().to_string(),
                attempts: 0,
                is_dry_run: ctx.is_dry_run(),
            },
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// 将载荷解码为具体类型
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// 编码为线上格式
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(encode_error)
    }

    /// 从线上格式解码
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// 供处理方恢复执行信息的上下文
    pub fn context(&self, parent: &Context) -> Context {
        let ctx = parent.clone().with_dry_run(self.meta.is_dry_run);
        if self.meta.correlation_id.is_empty() {
            ctx
        } else {
            ctx.with_correlation_id(self.meta.correlation_id.clone())
        }
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.meta.attempts += 1;
        self.meta.attempts
    }
}
