//! 日志门面（logger）
//!
//! 基于 `tracing-subscriber` 初始化全局输出（纯文本或 JSON），
//! 并提供按上下文与错误标签输出一行错误日志的便捷方法。
//!
use crate::context::Context;
use crate::error::Error;
use crate::kv;
use tracing_subscriber::EnvFilter;

/// 日志输出格式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Output {
    #[default]
    Plain,
    Json,
}

/// 初始化全局日志输出；`RUST_LOG` 未设置时默认 `info`
///
/// 重复初始化返回错误而不是 panic。
pub fn init(output: Output) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match output {
        Output::Plain => builder.try_init(),
        Output::Json => builder.json().try_init(),
    };

    result.map_err(|e| Error::invalid(format!("logger already initialised: {e}")))
}

/// 以 error 级别输出错误：上下文信息与错误标签作为字段
pub fn log_error(ctx: &Context, err: &Error) {
    tracing::error!(
        context = %kv::render(&ctx.pairs()),
        tags = %kv::render(err.tags()),
        categories = ?err.categories(),
        "{err}"
    );
}
