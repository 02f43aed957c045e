//! 发布者（Publisher）与订阅者（Subscriber）协议
//!
use super::{ErrorHandler, Event, Handler};
use crate::context::Context;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// 发布者：将事件写入底层流
#[async_trait]
pub trait Publisher: Send + Sync {
    /// 按顺序发布事件；遇到错误立即返回，已发布的事件不会回滚
    async fn emit(&self, ctx: &Context, events: &[Event]) -> Result<()>;

    /// 释放底层资源
    async fn close(&self) -> Result<()>;
}

/// 订阅者：持续消费事件直到上下文结束
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// 消费循环，不返回错误：所有失败通过 `error_handler` 上报
    async fn consume(
        &self,
        ctx: &Context,
        handler: Arc<dyn Handler>,
        error_handler: Arc<dyn ErrorHandler>,
    );

    /// 停止后台任务并释放底层资源
    async fn close(&self) -> Result<()>;
}
