//! 事件处理器（Handler）与失败处理器（ErrorHandler）
//!
use super::Event;
use crate::context::Context;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// 事件处理器：处理单条事件
///
/// 在重试场景下可能对同一事件多次调用，需保证幂等；
/// 当前是第几次处理可通过 `event.meta().attempts()` 获取。
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context, event: &Event) -> Result<()>;
}

/// 失败处理器：接收处理失败或传输层错误
///
/// `event` 仅在最后一次处理失败时提供；非最后一次失败与传输层错误均为 `None`。
/// 订阅者处理完事件后无论成败都会确认（ack），持久化失败事件（如死信队列）由此处负责。
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, ctx: &Context, err: Error, event: Option<&Event>);
}

type HandlerFn = dyn for<'a> Fn(&'a Context, &'a Event) -> BoxFuture<'a, Result<()>> + Send + Sync;

type ErrorHandlerFn =
    dyn for<'a> Fn(&'a Context, Error, Option<&'a Event>) -> BoxFuture<'a, ()> + Send + Sync;

struct FnHandler(Box<HandlerFn>);

#[async_trait]
impl Handler for FnHandler {
    async fn handle(&self, ctx: &Context, event: &Event) -> Result<()> {
        (self.0)(ctx, event).await
    }
}

struct FnErrorHandler(Box<ErrorHandlerFn>);

#[async_trait]
impl ErrorHandler for FnErrorHandler {
    async fn handle_error(&self, ctx: &Context, err: Error, event: Option<&Event>) {
        (self.0)(ctx, err, event).await
    }
}

/// 将闭包适配为 `Handler`
///
/// ```rust
/// use futures_util::FutureExt;
/// use relay_core::pubsub::handler_fn;
///
/// let handler = handler_fn(|_ctx, event| {
///     let name = event.name().to_string();
///     async move {
///         println!("handled {name}");
///         Ok::<_, relay_core::Error>(())
///     }
///     .boxed()
/// });
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a Context, &'a Event) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(Box::new(f)))
}

/// 将闭包适配为 `ErrorHandler`
pub fn error_handler_fn<F>(f: F) -> Arc<dyn ErrorHandler>
where
    F: for<'a> Fn(&'a Context, Error, Option<&'a Event>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnErrorHandler(Box::new(f)))
}

/// 仅输出日志的失败处理器
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ErrorHandler for LoggingErrorHandler {
    async fn handle_error(&self, ctx: &Context, err: Error, event: Option<&Event>) {
        match event {
            Some(event) => tracing::error!(
                event_id = event.id(),
                event_name = event.name(),
                attempts = event.meta().attempts(),
                correlation_id = ctx.correlation_id().unwrap_or_default(),
                error = %err,
                "event handling failed for good"
            ),
            None => tracing::warn!(
                correlation_id = ctx.correlation_id().unwrap_or_default(),
                error = %err,
                "pubsub error"
            ),
        }
    }
}
