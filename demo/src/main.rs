use anyhow::Context as _;
use async_trait::async_trait;
use relay_core::halt::Halter;
use relay_core::logger::{self, Output};
use relay_core::o11y::{Agent, TimelineAgent, TracingAgent};
use relay_core::pubsub::{Event, Handler, LoggingErrorHandler, Publisher, Subscriber};
use relay_core::{Category, Context, Error, Pair, Result};
use relay_redis::{
    FailureRecovery, RedisPublisher, RedisSettings, RedisSubscriber, Stream, SubscriberConfig,
    streams_for_subscriber,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

const ORDERS: &str = "orders";
const ORDER_CREATED: &str = "order.created";

#[derive(Debug, Serialize, Deserialize)]
struct OrderCreated {
    order_id: String,
    total: u64,
}

/// 每三个订单中有一个第一次处理失败，演示重试
struct ReserveStock;

/// 处理器看到的 `attempts` 从 1 开始
fn fails_first_attempt(order_id: &str, attempts: u32) -> bool {
    let seq: u64 = order_id.trim_start_matches("o-").parse().unwrap_or(0);
    seq % 3 == 0 && attempts == 1
}

#[async_trait]
impl Handler for ReserveStock {
    async fn handle(&self, _ctx: &Context, event: &Event) -> Result<()> {
        let order: OrderCreated = event.decode()?;
        if fails_first_attempt(&order.order_id, event.meta().attempts()) {
            return Err(Error::new("warehouse unavailable")
                .with_category(Category::Transient)
                .with_tag(Pair::new("order_id", order.order_id)));
        }

        info!(
            order_id = %order.order_id,
            total = order.total,
            attempts = event.meta().attempts(),
            "stock reserved"
        );
        Ok(())
    }
}

/// 等待后台任务结束，任务 panic 时返回错误
async fn join_tasks(consuming: JoinHandle<()>, producing: JoinHandle<()>) -> anyhow::Result<()> {
    let (consumed, produced) = tokio::join!(consuming, producing);
    consumed.context("consume task")?;
    produced.context("produce task")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init(Output::Plain)?;

    let settings = RedisSettings::load()?;
    let broker = Arc::new(settings.broker()?);
    // RELAY_TIMELINE=1 时以时间线形式打印每次消费的 Span 树
    let agent: Arc<dyn Agent> = match std::env::var_os("RELAY_TIMELINE") {
        Some(_) => Arc::new(TimelineAgent::new()),
        None => Arc::new(TracingAgent),
    };

    let publisher_streams = match settings.publisher.streams() {
        streams if streams.is_empty() => {
            vec![Stream::for_publisher(ORDERS, [ORDER_CREATED]).capped_at(10_000)]
        }
        streams => streams,
    };
    let publisher = Arc::new(
        RedisPublisher::builder()
            .broker(broker.clone())
            .streams(publisher_streams)
            .agent(agent.clone())
            .build(),
    );

    let (group_id, subscriber_streams, config) = match &settings.subscriber {
        Some(sub) => (sub.group_id.clone(), sub.streams(), sub.config()),
        None => (
            "demo".to_string(),
            streams_for_subscriber([ORDERS]),
            SubscriberConfig {
                max_attempts: 2,
                failure_recovery: FailureRecovery::every(Duration::from_secs(5)),
                ..Default::default()
            },
        ),
    };
    let subscriber = Arc::new(
        RedisSubscriber::builder()
            .broker(broker)
            .group_id(group_id)
            .streams(subscriber_streams)
            .config(config)
            .agent(agent)
            .build()?,
    );

    let (ctx, halter) = Halter::new(&Context::background().with_service_name("relay-demo"));

    let consuming = {
        let subscriber = subscriber.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            subscriber
                .consume(&ctx, Arc::new(ReserveStock), Arc::new(LoggingErrorHandler))
                .await;
        })
    };

    let producing = {
        let publisher = publisher.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut n: u64 = 0;
            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                tokio::select! {
                    _ = ctx.done() => break,
                    _ = ticker.tick() => {}
                }

                n += 1;
                let emit_ctx = ctx.clone().with_correlation_id(format!("demo-{n}"));
                let order = OrderCreated {
                    order_id: format!("o-{n}"),
                    total: n * 100,
                };
                let result = match Event::new(&emit_ctx, ORDER_CREATED, &order) {
                    Ok(event) => publisher.emit(&emit_ctx, &[event]).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    logger::log_error(&emit_ctx, &err);
                }
            }
        })
    };

    halter.wait().await;

    subscriber.close().await?;
    publisher.close().await?;
    join_tasks(consuming, producing).await?;
    info!("demo stopped");
    Ok(())
}
