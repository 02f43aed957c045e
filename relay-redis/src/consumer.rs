//! 条目消费（Consumer）
//!
//! 读取循环与恢复任务共享的消费状态：
//! - 消费组初始化：逐流建组，组已存在视为成功，其余失败上报后继续；
//! - 单条目消费：解码 -> 重试引擎 -> 无条件确认；
//! - 恢复扫描：逐流认领空闲条目并消费。
//!
use crate::broker::{GroupCreation, StreamBroker, StreamEntry};
use crate::config::SubscriberConfig;
use relay_core::o11y::{Agent, SpanGuard};
use relay_core::pubsub::{AttemptEngine, AttemptOutcome, ErrorHandler, Event, Handler};
use relay_core::{Category, Context, Error, Pair};
use std::sync::Arc;
use tracing::{debug, info, warn};

const GROUP_ID: &str = "pubsub.group_id";
const CONSUMER_ID: &str = "pubsub.consumer_id";

pub(crate) struct Consumer {
    pub(crate) broker: Arc<dyn StreamBroker>,
    pub(crate) group_id: String,
    pub(crate) consumer_id: String,
    pub(crate) streams: Vec<String>,
    pub(crate) config: SubscriberConfig,
    pub(crate) engine: AttemptEngine,
    pub(crate) agent: Arc<dyn Agent>,
}

impl Consumer {
    fn entry_error(err: Error, entry: &StreamEntry) -> Error {
        err.with_tag(Pair::new("pubsub.stream", entry.stream.as_str()))
            .with_tag(Pair::new("pubsub.entry_id", entry.id.as_str()))
    }

    pub(crate) async fn create_groups(&self, ctx: &Context, error_handler: &dyn ErrorHandler) {
        let span = SpanGuard::start(self.agent.as_ref(), ctx, "consumer group set up");
        span.add_pair(Pair::new(GROUP_ID, self.group_id.as_str()));
        span.add_pair(Pair::new(CONSUMER_ID, self.consumer_id.as_str()));

        for stream in &self.streams {
            span.add_event(stream);
            match self
                .broker
                .create_group(stream, &self.group_id, self.config.start_from)
                .await
            {
                Ok(GroupCreation::Created) => {
                    info!(stream = %stream, group_id = %self.group_id, "consumer group created");
                }
                Ok(GroupCreation::AlreadyExists) => {
                    debug!(stream = %stream, group_id = %self.group_id, "consumer group already exists");
                }
                Err(err) => {
                    let err = err
                        .prefixed("consumer group set up")
                        .with_category(Category::Transient)
                        .with_tag(Pair::new("pubsub.stream", stream.as_str()))
                        .with_context(ctx);
                    warn!(stream = %stream, error = %err, "consumer group set up failed");
                    span.record_error(&err, false);
                    error_handler.handle_error(ctx, err, None).await;
                }
            }
        }
    }

    /// 消费单个条目；无论处理结果如何都会确认。解码失败时返回 None
    pub(crate) async fn consume_entry(
        &self,
        ctx: &Context,
        entry: StreamEntry,
        handler: &dyn Handler,
        error_handler: &dyn ErrorHandler,
    ) -> Option<AttemptOutcome> {
        let decoded = match entry.payload.as_deref() {
            Some(bytes) => Event::from_bytes(bytes),
            None => Err(Error::new("redis entry without event field")
                .with_category(Category::Decode)
                .with_category(Category::Permanent)),
        };

        let outcome = match decoded {
            Ok(mut event) => {
                let ctx = event.context(ctx);
                let span = SpanGuard::start(self.agent.as_ref(), &ctx, "consume");
                span.add_pair(Pair::new(GROUP_ID, self.group_id.as_str()));
                span.add_pair(Pair::new(CONSUMER_ID, self.consumer_id.as_str()));
                span.add_pair(Pair::new(
                    "pubsub.correlation_id",
                    event.meta().correlation_id(),
                ));
                span.add_pair(Pair::new("pubsub.is_dry_run", event.meta().is_dry_run()));
                span.add_event(event.name());
                let ctx = ctx.with_span(span.handle());

                let outcome = self
                    .engine
                    .run(&ctx, &mut event, handler, error_handler, span.span())
                    .await;
                debug!(
                    entry_id = %entry.id,
                    event_name = event.name(),
                    handled = outcome.is_handled(),
                    attempts = outcome.attempts(),
                    "redis entry consumed"
                );
                Some(outcome)
            }
            Err(err) => {
                let err = Self::entry_error(err.prefixed("decode redis entry"), &entry)
                    .with_context(ctx);
                warn!(entry_id = %entry.id, error = %err, "undecodable redis entry");
                error_handler.handle_error(ctx, err, None).await;
                None
            }
        };

        self.ack(ctx, &entry, error_handler).await;
        outcome
    }

    async fn ack(&self, ctx: &Context, entry: &StreamEntry, error_handler: &dyn ErrorHandler) {
        if let Err(err) = self
            .broker
            .ack(&entry.stream, &self.group_id, &entry.id)
            .await
        {
            let err = Self::entry_error(err.with_category(Category::Transient), entry)
                .with_context(ctx);
            warn!(entry_id = %entry.id, error = %err, "redis ack failed");
            error_handler.handle_error(ctx, err, None).await;
        }
    }

    /// 一轮恢复扫描：认领各流中空闲超过 `max_attempts × consume_timeout` 的条目
    pub(crate) async fn recover(
        &self,
        ctx: &Context,
        handler: &dyn Handler,
        error_handler: &dyn ErrorHandler,
    ) -> usize {
        let span = SpanGuard::start(self.agent.as_ref(), ctx, "potential failure recovery");
        span.add_pair(Pair::new(GROUP_ID, self.group_id.as_str()));

        let idle = self.config.idle_timeout();
        let mut recovered = 0;

        for stream in &self.streams {
            span.add_event(stream);
            let claimed = self
                .broker
                .auto_claim(
                    stream,
                    &self.group_id,
                    &self.consumer_id,
                    idle,
                    self.config.read_capacity,
                )
                .await;

            match claimed {
                Ok(claimed) => {
                    if !claimed.entries.is_empty() {
                        info!(
                            stream = %stream,
                            count = claimed.entries.len(),
                            "claimed idle redis entries"
                        );
                    }
                    for entry in claimed.entries {
                        self.consume_entry(ctx, entry, handler, error_handler).await;
                        recovered += 1;
                    }
                }
                Err(err) => {
                    let err = err
                        .with_tag(Pair::new("pubsub.stream", stream.as_str()))
                        .with_context(ctx);
                    warn!(stream = %stream, error = %err, "redis xautoclaim failed");
                    span.record_error(&err, false);
                    error_handler.handle_error(ctx, err, None).await;
                }
            }
        }

        recovered
    }
}
