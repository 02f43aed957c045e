//! 需要真实 Redis（>= 6.2）：`REDIS_URL=redis://localhost:6379 cargo test -- --ignored`

mod common;

use common::{ScriptedHandler, SpyErrorHandler, eventually, spawn_consume, stop};
use relay_core::pubsub::{Event, Publisher, Subscriber};
use relay_core::Context;
use relay_redis::{
    FailureRecovery, GroupCreation, RedisBroker, RedisPublisher, RedisSubscriber, StartFrom,
    Stream, StreamBroker, SubscriberConfig, streams_for_subscriber,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn broker() -> Arc<RedisBroker> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    Arc::new(RedisBroker::from_url(url).unwrap())
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running redis"]
async fn group_creation_is_idempotent() {
    let broker = broker();
    let stream = unique("relay-test-stream");

    let first = broker
        .create_group(&stream, "g", StartFrom::Latest)
        .await
        .unwrap();
    let second = broker
        .create_group(&stream, "g", StartFrom::Latest)
        .await
        .unwrap();

    assert_eq!(first, GroupCreation::Created);
    assert_eq!(second, GroupCreation::AlreadyExists);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running redis"]
async fn publish_and_consume_round_trip() {
    let broker = broker();
    let stream = unique("relay-test-orders");
    let publisher = RedisPublisher::builder()
        .broker(broker.clone())
        .streams(vec![Stream::for_publisher(&stream, ["order.created"]).capped_at(1000)])
        .build();

    let subscriber = Arc::new(
        RedisSubscriber::builder()
            .broker(broker.clone())
            .group_id(unique("relay-test-group"))
            .streams(streams_for_subscriber([stream.as_str()]))
            .config(SubscriberConfig {
                max_attempts: 2,
                read_block: Duration::from_millis(100),
                failure_recovery: FailureRecovery::every(Duration::from_millis(200)),
                ..Default::default()
            })
            .build()
            .unwrap(),
    );

    let handler = ScriptedHandler::failing_until(1);
    let errors = SpyErrorHandler::new();
    let ctx = Context::background();
    let task = spawn_consume(subscriber.clone(), ctx.clone(), handler.clone(), errors.clone());
    // 等待消费组建立
    tokio::time::sleep(Duration::from_millis(300)).await;

    let event = Event::from_value(&Context::background(), "order.created", json!({"order_id": "o-1"}));
    publisher.emit(&Context::background(), &[event.clone()]).await.unwrap();

    eventually("event handled", || handler.calls().len() == 2).await;
    subscriber.close().await.unwrap();
    stop(&ctx, task).await;

    assert_eq!(errors.count(), 1);
    assert_eq!(handler.handled_event_ids(), vec![event.id().to_string()]);
}
