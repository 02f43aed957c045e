//! 执行上下文（Context）
//!
//! 一次执行（请求、消费循环、单条事件处理）所需的横切信息：
//! - 取消信号（`CancellationToken`），父上下文取消时子上下文随之取消；
//! - 可选截止时间（尽力而为，由调用方自行遵守）；
//! - 执行信息：关联 ID、触发方、是否演练（dry run）、服务名/主机/构建号；
//! - 当前 Span：在其下开始的 Span 可作为子 Span（取决于 Agent）。
//!
use crate::kv::{Pair, keys};
use crate::o11y::Span;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 执行上下文，克隆代价低，可在任务间传递
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    correlation_id: Option<String>,
    triggered_by: Option<String>,
    is_dry_run: bool,
    service_name: Option<String>,
    service_host: Option<String>,
    build_id: Option<String>,
    span: SpanSlot,
}

#[derive(Clone, Default)]
struct SpanSlot(Option<Arc<dyn Span>>);

impl fmt::Debug for SpanSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Some(<span>)"),
            None => f.write_str("None"),
        }
    }
}

impl Context {
    /// 根上下文：无截止时间、未取消
    pub fn background() -> Self {
        Self::default()
    }

    /// 派生可独立取消的子上下文
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..self.clone()
        }
    }

    /// 派生带超时的子上下文，截止时间取较早者
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// 将 `span` 设为当前 Span
    pub fn with_span(mut self, span: Arc<dyn Span>) -> Self {
        self.span = SpanSlot(Some(span));
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_triggered_by(mut self, name: impl Into<String>) -> Self {
        self.triggered_by = Some(name.into());
        self
    }

    pub fn with_dry_run(mut self, is_dry_run: bool) -> Self {
        self.is_dry_run = is_dry_run;
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_service_host(mut self, host: impl Into<String>) -> Self {
        self.service_host = Some(host.into());
        self
    }

    pub fn with_build_id(mut self, id: impl Into<String>) -> Self {
        self.build_id = Some(id.into());
        self
    }

    /// 取消当前上下文及其所有子上下文
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 已取消或已超过截止时间
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_deadline_exceeded()
    }

    /// 等待上下文结束（取消或到达截止时间）
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// 上下文结束的原因；未结束时返回 None
    pub fn err(&self) -> Option<crate::Error> {
        if self.is_cancelled() {
            return Some(crate::Error::context("context cancelled"));
        }
        if self.is_deadline_exceeded() {
            return Some(crate::Error::context("context deadline exceeded"));
        }
        None
    }

    /// 返回底层取消令牌，便于与 `tokio::select!` 组合
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn triggered_by(&self) -> Option<&str> {
        self.triggered_by.as_deref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.is_dry_run
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn service_host(&self) -> Option<&str> {
        self.service_host.as_deref()
    }

    pub fn build_id(&self) -> Option<&str> {
        self.build_id.as_deref()
    }

    pub fn span(&self) -> Option<&Arc<dyn Span>> {
        self.span.0.as_ref()
    }

    /// 以键值对形式导出执行信息（缺省值不导出，`is_dry_run` 总是导出）
    pub fn pairs(&self) -> Vec<Pair> {
        let mut pairs = Vec::with_capacity(6);
        let optional = [
            (keys::BUILD_ID, &self.build_id),
            (keys::SERVICE_HOST, &self.service_host),
            (keys::SERVICE_NAME, &self.service_name),
            (keys::CORRELATION_ID, &self.correlation_id),
            (keys::TRIGGERED_BY, &self.triggered_by),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                pairs.push(Pair::new(key, v));
            }
        }
        pairs.push(Pair::new(keys::IS_DRY_RUN, self.is_dry_run));
        pairs
    }
}
