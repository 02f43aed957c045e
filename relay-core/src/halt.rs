//! 优雅停机（halt）
//!
//! 监听 SIGINT/SIGTERM（非 unix 平台仅 Ctrl+C），收到信号后取消派生出的上下文，
//! 让消费循环等长驻任务自然退出。
//!
use crate::context::Context;
use tracing::info;

/// 停机协调器
pub struct Halter {
    ctx: Context,
}

impl Halter {
    /// 派生一个在收到停机信号时被取消的上下文
    ///
    /// 需在 tokio 运行时内调用。
    pub fn new(parent: &Context) -> (Context, Self) {
        let ctx = parent.with_cancel();

        let watched = ctx.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    info!(signal, "stopper signal captured");
                    watched.cancel();
                }
                _ = watched.done() => {}
            }
        });

        (ctx.clone(), Self { ctx })
    }

    /// 阻塞直到上下文结束
    pub async fn wait(&self) {
        self.ctx.done().await;
        info!("stopper gracefully shutting down");
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        return ctrl_c().await;
    };

    tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl_c",
        // 无法安装信号处理器时永不触发，仅依赖上下文取消
        Err(_) => std::future::pending().await,
    }
}
