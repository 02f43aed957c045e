//! 结构化错误（Error）
//!
//! 错误由三部分组成：
//! - 消息链：`Display` 以 `": "` 连接，保留底层错误的原始描述；
//! - 分类（`Category`）：用于判断是否值得重试、是否由上下文取消导致等；
//! - 标签（`Pair`）：附加的上下文信息，例如重试次数。
//!
//! 通过 `is`/`tag` 可在任意 `std::error::Error` 的 source 链上查询分类与标签。
//!
use crate::context::Context;
use crate::kv::{Pair, Value};
use std::error::Error as StdError;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 错误分类
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// 重试可能成功
    Transient,
    /// 重试无意义
    Permanent,
    /// 由上下文取消或超时导致
    Context,
    /// 目标资源不存在
    NonExistent,
    /// 违反校验约束
    Invalid,
    /// 解码失败
    Decode,
    /// 编码失败
    Encode,
    /// 未在期限内完成
    Timeout,
}

/// 统一错误类型
#[derive(Debug, Error)]
#[error("{}", .messages.join(": "))]
pub struct Error {
    messages: Vec<String>,
    categories: Vec<Category>,
    tags: Vec<Pair>,
    #[source]
    source: Option<BoxError>,
}

/// 统一 Result 类型别名
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            categories: Vec::new(),
            tags: Vec::new(),
            source: None,
        }
    }

    /// 包装任意错误：消息链为 `message: source`，source 链保留原错误
    pub fn wrap<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            messages: vec![message.into(), source.to_string()],
            categories: Vec::new(),
            tags: Vec::new(),
            source: Some(Box::new(source)),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(message).with_category(Category::Transient)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(message).with_category(Category::Permanent)
    }

    pub fn context(message: impl Into<String>) -> Self {
        Self::new(message)
            .with_category(Category::Context)
            .with_category(Category::Permanent)
    }

    pub fn non_existent(message: impl Into<String>) -> Self {
        Self::new(message)
            .with_category(Category::NonExistent)
            .with_category(Category::Permanent)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(message).with_category(Category::Invalid)
    }

    pub fn with_category(mut self, category: Category) -> Self {
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }

    /// 追加标签；同名标签以先写入者为准
    pub fn with_tag(mut self, pair: Pair) -> Self {
        if !self.tags.iter().any(|t| t.key() == pair.key()) {
            self.tags.push(pair);
        }
        self
    }

    /// 覆盖同名标签，用于重试次数等会变化的信息
    pub fn set_tag(mut self, pair: Pair) -> Self {
        self.tags.retain(|t| t.key() != pair.key());
        self.tags.push(pair);
        self
    }

    /// 合并上下文信息；上下文已结束时追加 `Category::Context`
    pub fn with_context(mut self, ctx: &Context) -> Self {
        for pair in ctx.pairs() {
            self = self.with_tag(pair);
        }
        if ctx.is_done() {
            self = self.with_category(Category::Context);
        }
        self
    }

    /// 在消息链前追加一段说明
    pub fn prefixed(mut self, message: impl Into<String>) -> Self {
        self.messages.insert(0, message.into());
        self
    }

    pub fn is(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.iter().find(|t| t.key() == key).map(Pair::value)
    }

    pub fn tags(&self) -> &[Pair] {
        &self.tags
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        let category = if err.is_data() || err.is_syntax() || err.is_eof() {
            Category::Decode
        } else {
            Category::Encode
        };
        Error::wrap("serialization error", err)
            .with_category(category)
            .with_category(Category::Permanent)
    }
}

/// 在 source 链上查找首个 `Error`
fn structured<'a>(err: &'a (dyn StdError + 'static)) -> impl Iterator<Item = &'a Error> {
    std::iter::successors(Some(err), |&e| e.source()).filter_map(|e| e.downcast_ref::<Error>())
}

/// 判断错误（含 source 链）是否属于给定分类
pub fn is(err: &(dyn StdError + 'static), category: Category) -> bool {
    structured(err).any(|e| e.is(category))
}

/// 在错误（含 source 链）上查找标签
pub fn tag<'a>(key: &str, err: &'a (dyn StdError + 'static)) -> Option<&'a Value> {
    structured(err).find_map(|e| e.tag(key))
}
