//! 发布/订阅（pubsub）
//!
//! 提供发布/订阅机制的通用契约与运行时：
//! - `Event`：事件信封（ID、名称、元数据、载荷）；
//! - `Publisher`/`Subscriber`：发布与消费的统一接口；
//! - `Handler`/`ErrorHandler`：事件处理与失败上报；
//! - `AttemptEngine`：单条事件的有限次重试与带次数标签的失败上报；
//! - `memory`：基于进程内通道的实现（需开启 `memory` 特性）。
//!
//! 该模块不绑定具体传输实现，可对接任意消息系统。
//!
mod attempts;
mod bus;
mod event;
mod handler;
#[cfg(feature = "memory")]
pub mod memory;

pub use attempts::{ATTEMPT_TAG, AttemptEngine, AttemptOutcome, IS_LAST_ATTEMPT_TAG};
pub use bus::{Publisher, Subscriber};
pub use event::{Event, Meta};
pub use handler::{
    ErrorHandler, Handler, LoggingErrorHandler, error_handler_fn, handler_fn,
};
