//! Redis 订阅者（RedisSubscriber）
//!
//! 一次 `consume` 调用的生命周期：
//! 1. 为每个流初始化消费组；
//! 2. 开启失败恢复时启动恢复任务；
//! 3. 主循环：检查上下文 -> 有界阻塞读取 -> 逐条消费 -> 继续；
//!    读取失败上报后暂停一个阻塞窗口再重试。
//!
//! 处理完成（成功或重试耗尽）的条目都会被确认，不会再次消费；
//! 只有未能确认的条目才会被恢复任务重新认领。失败事件的持久化（如死信队列）由失败处理器负责。
//!
use crate::broker::StreamBroker;
use crate::config::SubscriberConfig;
use crate::consumer::Consumer;
use crate::recovery::RecoveryHandle;
use crate::stream::Stream;
use async_trait::async_trait;
use bon::bon;
use relay_core::o11y::{self, Agent};
use relay_core::pubsub::{AttemptEngine, ErrorHandler, Handler, Subscriber};
use relay_core::{Category, Context, Error, Pair, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct RedisSubscriber {
    consumer: Arc<Consumer>,
    recovery: Mutex<Option<RecoveryHandle>>,
    closed: CancellationToken,
}

#[bon]
impl RedisSubscriber {
    /// 至少需要一个流，否则返回 `Invalid + Permanent` 错误
    #[builder]
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        #[builder(into)] group_id: String,
        streams: Vec<Stream>,
        #[builder(default)] config: SubscriberConfig,
        #[builder(default = o11y::noop())] agent: Arc<dyn Agent>,
        // 缺省自动生成；同一消费组内的每个实例必须唯一
        #[builder(into)]
        consumer_id: Option<String>,
    ) -> Result<Self> {
        if streams.is_empty() {
            return Err(Error::invalid("at least one stream to read from is required")
                .with_category(Category::Permanent)
                .with_tag(Pair::new("pubsub.group_id", group_id)));
        }

        let config = config.normalized();
        let consumer = Consumer {
            broker,
            group_id,
            consumer_id: consumer_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            streams: streams.iter().map(|s| s.name().to_string()).collect(),
            engine: AttemptEngine::new(config.max_attempts, config.consume_timeout),
            config,
            agent,
        };

        Ok(Self {
            consumer: Arc::new(consumer),
            recovery: Mutex::new(None),
            closed: CancellationToken::new(),
        })
    }
}

impl RedisSubscriber {
    pub fn group_id(&self) -> &str {
        &self.consumer.group_id
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer.consumer_id
    }

    pub fn streams(&self) -> &[String] {
        &self.consumer.streams
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.consumer.config
    }

    /// 恢复任务是否在运行
    pub fn is_recovering(&self) -> bool {
        self.recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn start_recovery(
        &self,
        ctx: &Context,
        handler: &Arc<dyn Handler>,
        error_handler: &Arc<dyn ErrorHandler>,
    ) {
        if !self.consumer.config.failure_recovery.enabled {
            return;
        }

        let handle = RecoveryHandle::spawn(
            self.consumer.clone(),
            ctx.with_cancel(),
            handler.clone(),
            error_handler.clone(),
        );
        // 重复 consume 时替换旧任务，旧句柄析构即停止
        let previous = self
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.shutdown();
        }
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn consume(
        &self,
        ctx: &Context,
        handler: Arc<dyn Handler>,
        error_handler: Arc<dyn ErrorHandler>,
    ) {
        let consumer = &self.consumer;
        consumer.create_groups(ctx, error_handler.as_ref()).await;
        self.start_recovery(ctx, &handler, &error_handler);

        info!(
            group_id = %consumer.group_id,
            consumer_id = %consumer.consumer_id,
            streams = ?consumer.streams,
            "redis subscriber consuming"
        );

        loop {
            if ctx.is_done() || self.closed.is_cancelled() {
                break;
            }

            // 读取不与取消竞争：已投递的条目若被丢弃，会一直挂在本消费者的待处理列表中。
            // 阻塞窗口 `read_block` 限定了停止的最大延迟。
            let read = consumer
                .broker
                .read_group(
                    &consumer.streams,
                    &consumer.group_id,
                    &consumer.consumer_id,
                    consumer.config.read_capacity,
                    consumer.config.read_block,
                )
                .await;

            match read {
                Ok(entries) => {
                    for entry in entries {
                        consumer
                            .consume_entry(ctx, entry, handler.as_ref(), error_handler.as_ref())
                            .await;
                    }
                }
                Err(err) => {
                    let err = err
                        .prefixed("read redis streams")
                        .with_category(Category::Transient)
                        .with_context(ctx);
                    warn!(group_id = %consumer.group_id, error = %err, "redis read failed");
                    error_handler.handle_error(ctx, err, None).await;

                    tokio::select! {
                        _ = ctx.done() => break,
                        _ = self.closed.cancelled() => break,
                        _ = tokio::time::sleep(consumer.config.read_block) => {}
                    }
                }
            }
        }

        info!(
            group_id = %consumer.group_id,
            consumer_id = %consumer.consumer_id,
            "redis subscriber stopped"
        );
    }

    /// 停止读取并等待恢复任务结束
    async fn close(&self) -> Result<()> {
        self.closed.cancel();

        let recovery = self
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(recovery) = recovery {
            recovery.shutdown();
            recovery.join().await;
        }
        Ok(())
    }
}
