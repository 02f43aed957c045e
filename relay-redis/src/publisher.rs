//! Redis 发布者（RedisPublisher）
//!
//! 按事件顺序依次追加：
//! - 上下文已结束：返回 `Context` 错误，不再追加；
//! - 事件名未路由：返回 `NonExistent + Permanent` 错误（已追加的事件不回滚）；
//! - 追加失败：包装为 `Permanent` 错误并中止剩余事件。
//!
use crate::broker::StreamBroker;
use crate::stream::{Stream, StreamRouter};
use async_trait::async_trait;
use bon::bon;
use relay_core::o11y::{self, Agent, SpanGuard};
use relay_core::pubsub::{Event, Publisher};
use relay_core::{Category, Context, Error, Pair, Result};
use std::sync::Arc;
use tracing::debug;

pub struct RedisPublisher {
    broker: Arc<dyn StreamBroker>,
    router: StreamRouter,
    agent: Arc<dyn Agent>,
}

#[bon]
impl RedisPublisher {
    #[builder]
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        streams: Vec<Stream>,
        #[builder(default = o11y::noop())] agent: Arc<dyn Agent>,
    ) -> Self {
        Self {
            broker,
            router: StreamRouter::new(&streams),
            agent,
        }
    }
}

impl RedisPublisher {
    pub fn router(&self) -> &StreamRouter {
        &self.router
    }

    async fn emit_one(&self, ctx: &Context, event: &Event) -> Result<String> {
        if let Some(err) = ctx.err() {
            return Err(err.prefixed("emit").with_context(ctx));
        }

        let route = self.router.route(event.name()).ok_or_else(|| {
            Error::non_existent("unknown redis stream for event")
                .with_tag(Pair::new("event_name", event.name()))
        })?;

        let payload = event.to_bytes()?;
        self.broker
            .append(route.stream, route.capacity, &payload)
            .await
            .map_err(|e| {
                Error::wrap("redis xadd", e)
                    .with_category(Category::Permanent)
                    .with_tag(Pair::new("event_name", event.name()))
            })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn emit(&self, ctx: &Context, events: &[Event]) -> Result<()> {
        let span = SpanGuard::start(self.agent.as_ref(), ctx, "emit");

        for event in events {
            span.add_event(event.name());
            match self.emit_one(ctx, event).await {
                Ok(entry_id) => {
                    debug!(
                        event_id = event.id(),
                        event_name = event.name(),
                        entry_id = %entry_id,
                        "event appended"
                    );
                }
                Err(err) => {
                    span.record_error(&err, true);
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
