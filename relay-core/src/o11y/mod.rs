//! 可观测性（o11y）
//!
//! 以 Span 为工作单元的最小抽象：
//! - `Agent`：创建 Span 的入口，由调用方注入（无全局注册表）；
//! - `Span`：记录键值对、事件与错误，并在工作结束时 `complete`。
//!
//! 内置后端：`NoopAgent`（丢弃一切）、`TracingAgent`（转为 tracing span/事件）、
//! `MemoryAgent`（保存在内存中，便于测试断言）、`TimelineAgent`（根 Span 完成时打印整棵 Span 树）。
//!
//! 通过 `Context::with_span` 设置当前 Span 后，支持嵌套的 Agent 会把新 Span 挂到它下面。
//!
mod memory;
mod timeline;
mod noop;
mod tracing_agent;

pub use memory::{MemoryAgent, MemorySpan};
pub use noop::NoopAgent;
pub use timeline::TimelineAgent;
pub use tracing_agent::TracingAgent;

use crate::context::Context;
use crate::error::Error;
use crate::kv::Pair;
use std::sync::Arc;

/// 一段工作的观测记录
pub trait Span: Send + Sync {
    /// 附加键值对属性
    fn add_pair(&self, pair: Pair);

    /// 记录一个带名称的时间点事件
    fn add_event(&self, name: &str);

    /// 记录错误；`fatal` 表示该 Span 以失败告终
    fn record_error(&self, err: &Error, fatal: bool);

    /// 工作结束
    fn complete(&self);

    /// 在本 Span 下开始子 Span；不支持嵌套时返回 None
    fn start_child(&self, _ctx: &Context, _name: &str) -> Option<Arc<dyn Span>> {
        None
    }
}

/// Span 工厂
pub trait Agent: Send + Sync {
    /// 开始新的 Span，上下文中的执行信息会作为初始属性
    fn start_span(&self, ctx: &Context, name: &str) -> Arc<dyn Span>;

    /// 刷新尚未完成的 Span
    fn flush(&self) {}
}

/// 默认 Agent：丢弃一切
pub fn noop() -> Arc<dyn Agent> {
    Arc::new(NoopAgent)
}

/// 在作用域结束时自动 `complete` 的 Span 守卫
pub struct SpanGuard(Arc<dyn Span>);

impl SpanGuard {
    pub fn start(agent: &dyn Agent, ctx: &Context, name: &str) -> Self {
        Self(agent.start_span(ctx, name))
    }

    pub fn span(&self) -> &dyn Span {
        self.0.as_ref()
    }

    /// 共享的 Span 句柄，用于放入 `Context`
    pub fn handle(&self) -> Arc<dyn Span> {
        self.0.clone()
    }
}

impl std::ops::Deref for SpanGuard {
    type Target = dyn Span;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.0.complete();
    }
}
