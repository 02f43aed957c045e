//! 内存版发布/订阅（InMemoryBus）
//!
//! 适用于单体应用、尚未选定消息中间件或原型验证：
//! - `InMemoryBus`：显式持有的订阅者注册表，可在同一进程内创建多个互不干扰的总线；
//! - `InMemoryPublisher::emit`：将事件投递给发布时已注册的全部订阅者；
//! - `InMemorySubscriber`：每个订阅者持有一个有界通道，满载时发布方等待，
//!   直到有空位或订阅者关闭（关闭后等待中的投递静默放弃，不会 panic）。
//!
use super::{AttemptEngine, ErrorHandler, Event, Handler, Publisher, Subscriber};
use crate::context::Context;
use crate::error::Result;
use crate::kv::Pair;
use crate::o11y::{self, Agent, SpanGuard};
use async_trait::async_trait;
use bon::Builder;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
struct Slot {
    tx: mpsc::Sender<Event>,
    closed: CancellationToken,
}

impl Slot {
    async fn deliver(self, events: Vec<Event>) {
        for event in events {
            tokio::select! {
                // 订阅者已关闭：放弃剩余投递
                _ = self.closed.cancelled() => return,
                sent = self.tx.send(event) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// 内存总线：订阅者注册表
#[derive(Clone, Default)]
pub struct InMemoryBus {
    subscribers: Arc<DashMap<String, Slot>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前注册的订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// 创建发布者
    pub fn publisher(&self, config: InMemoryPublisherConfig) -> InMemoryPublisher {
        InMemoryPublisher {
            id: config.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            bus: self.clone(),
            agent: config.agent,
        }
    }

    /// 创建并注册订阅者；注册后发布的事件才会投递给它
    pub fn subscriber(&self, config: InMemorySubscriberConfig) -> InMemorySubscriber {
        let id = config.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let closed = CancellationToken::new();

        self.subscribers.insert(
            id.clone(),
            Slot {
                tx,
                closed: closed.clone(),
            },
        );
        debug!(subscriber_id = %id, "in-memory subscriber registered");

        InMemorySubscriber {
            id,
            bus: self.clone(),
            rx: Mutex::new(rx),
            closed,
            engine: AttemptEngine::new(config.max_attempts, config.consume_timeout),
            agent: config.agent,
        }
    }

    fn snapshot(&self) -> Vec<Slot> {
        // 复制后再投递，避免跨 await 持有分片锁
        self.subscribers.iter().map(|e| e.value().clone()).collect()
    }

    fn deregister(&self, id: &str) {
        self.subscribers.remove(id);
    }
}

/// 内存发布者配置
#[derive(Builder, Clone)]
pub struct InMemoryPublisherConfig {
    /// 发布者标识（用于追踪），缺省自动生成
    id: Option<String>,
    #[builder(default = o11y::noop())]
    agent: Arc<dyn Agent>,
}

impl Default for InMemoryPublisherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// 内存订阅者配置
#[derive(Builder, Clone)]
pub struct InMemorySubscriberConfig {
    /// 订阅者标识（用于追踪），缺省自动生成
    id: Option<String>,
    /// 单条事件最大处理次数，默认 1（不重试）
    #[builder(default = 1)]
    max_attempts: u32,
    /// 通道容量，即同时在途的事件数，默认 10
    #[builder(default = 10)]
    queue_size: usize,
    /// 单次处理时限，默认 1s
    #[builder(default = Duration::from_secs(1))]
    consume_timeout: Duration,
    #[builder(default = o11y::noop())]
    agent: Arc<dyn Agent>,
}

impl Default for InMemorySubscriberConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// 内存发布者
pub struct InMemoryPublisher {
    id: String,
    bus: InMemoryBus,
    agent: Arc<dyn Agent>,
}

impl InMemoryPublisher {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    /// 投递给全部订阅者后返回；不会产生错误
    async fn emit(&self, ctx: &Context, events: &[Event]) -> Result<()> {
        let span = SpanGuard::start(self.agent.as_ref(), ctx, "emit");
        span.add_pair(Pair::new("pubsub.publisher_id", self.id.as_str()));
        for (i, ev) in events.iter().enumerate() {
            span.add_event(ev.name());
            span.add_pair(Pair::new(format!("event_{i}"), ev.name()));
        }

        let slots = self.bus.snapshot();
        join_all(slots.into_iter().map(|slot| slot.deliver(events.to_vec()))).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 内存订阅者
pub struct InMemorySubscriber {
    id: String,
    bus: InMemoryBus,
    rx: Mutex<mpsc::Receiver<Event>>,
    closed: CancellationToken,
    engine: AttemptEngine,
    agent: Arc<dyn Agent>,
}

impl InMemorySubscriber {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn consume_event(
        &self,
        ctx: &Context,
        mut event: Event,
        handler: &dyn Handler,
        error_handler: &dyn ErrorHandler,
    ) {
        let ctx = event.context(ctx);
        let span = SpanGuard::start(self.agent.as_ref(), &ctx, "consume");
        span.add_pair(Pair::new("pubsub.subscriber_id", self.id.as_str()));
        span.add_pair(Pair::new("pubsub.event_name", event.name()));
        let ctx = ctx.with_span(span.handle());

        let outcome = self
            .engine
            .run(&ctx, &mut event, handler, error_handler, span.span())
            .await;
        debug!(
            subscriber_id = %self.id,
            event_id = event.id(),
            handled = outcome.is_handled(),
            attempts = outcome.attempts(),
            "in-memory event consumed"
        );
    }
}

#[async_trait]
impl Subscriber for InMemorySubscriber {
    /// 逐条消费直到上下文结束或订阅者关闭
    async fn consume(
        &self,
        ctx: &Context,
        handler: Arc<dyn Handler>,
        error_handler: Arc<dyn ErrorHandler>,
    ) {
        let mut rx = self.rx.lock().await;

        loop {
            if ctx.is_done() || self.closed.is_cancelled() {
                break;
            }

            let event = tokio::select! {
                _ = ctx.done() => break,
                _ = self.closed.cancelled() => break,
                received = rx.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
            };

            self.consume_event(ctx, event, handler.as_ref(), error_handler.as_ref())
                .await;
        }
    }

    async fn close(&self) -> Result<()> {
        self.bus.deregister(&self.id);
        self.closed.cancel();
        info!(subscriber_id = %self.id, "in-memory subscriber closed");
        Ok(())
    }
}
