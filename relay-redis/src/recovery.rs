//! 失败恢复任务（RecoveryHandle）
//!
//! 按固定节奏运行恢复扫描的后台任务：
//! - 启动后立即扫描一次，之后每隔 `cadence` 扫描，错过的节拍直接跳过；
//! - 随订阅上下文取消而停止；
//! - 由 `RecoveryHandle` 显式持有，`shutdown` + `join` 可确定性地等待任务结束，
//!   句柄被丢弃时同样会发出停止信号。
//!
use crate::consumer::Consumer;
use relay_core::Context;
use relay_core::pubsub::{ErrorHandler, Handler};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 恢复任务运行句柄
pub struct RecoveryHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RecoveryHandle {
    pub(crate) fn spawn(
        consumer: Arc<Consumer>,
        ctx: Context,
        handler: Arc<dyn Handler>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        let token = ctx.token().child_token();
        let cadence = consumer.config.failure_recovery.cadence;

        let task = tokio::spawn({
            let token = token.clone();
            async move {
                let mut ticker = time::interval(cadence);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ctx.done() => break,
                        _ = ticker.tick() => {
                            let recovered = consumer
                                .recover(&ctx, handler.as_ref(), error_handler.as_ref())
                                .await;
                            debug!(group_id = %consumer.group_id, recovered, "failure recovery scan finished");
                        }
                    }
                }
            }
        });

        Self {
            token,
            task: Some(task),
        }
    }

    /// 发出停止信号；进行中的扫描会处理完当前条目
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// 等待任务结束
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RecoveryHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
