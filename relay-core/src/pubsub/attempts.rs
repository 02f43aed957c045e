//! 重试引擎（AttemptEngine）
//!
//! 单条事件的有限次处理：
//! 1. 每次处理前递增 `attempts`，并派生带截止时间的上下文（尽力而为，不强行中断处理器）；
//! 2. 处理成功立即停止；
//! 3. 处理失败时为错误打上 `pubsub.attempt` 与 `pubsub.is_last_attempt` 标签并上报，
//!    仅最后一次失败附带事件本身。
//!
//! 是否确认（ack）由调用方决定，引擎只负责重试与上报。
//!
use super::{ErrorHandler, Event, Handler};
use crate::context::Context;
use crate::kv::Pair;
use crate::o11y::Span;
use std::time::Duration;
use tracing::debug;

/// 错误标签：第几次处理
pub const ATTEMPT_TAG: &str = "pubsub.attempt";
/// 错误标签：是否为最后一次处理
pub const IS_LAST_ATTEMPT_TAG: &str = "pubsub.is_last_attempt";

/// 单条事件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 在第 `attempts` 次处理成功
    Handled { attempts: u32 },
    /// 处理次数耗尽仍失败（或事件已无剩余次数）
    Exhausted { attempts: u32 },
}

impl AttemptOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, AttemptOutcome::Handled { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            AttemptOutcome::Handled { attempts } | AttemptOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }
}

/// 重试引擎配置：最大处理次数与单次处理时限
#[derive(Debug, Clone, Copy)]
pub struct AttemptEngine {
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl AttemptEngine {
    /// `max_attempts` 最小为 1
    pub fn new(max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// 在 `event` 上执行处理循环，`attempts` 会被原地递增
    pub async fn run(
        &self,
        ctx: &Context,
        event: &mut Event,
        handler: &dyn Handler,
        error_handler: &dyn ErrorHandler,
        span: &dyn Span,
    ) -> AttemptOutcome {
        while event.meta().attempts() < self.max_attempts {
            span.add_event(&format!("attempt {}", event.meta().attempts()));
            let attempt = event.begin_attempt();
            let is_last_attempt = attempt == self.max_attempts;

            let attempt_ctx = ctx.with_timeout(self.attempt_timeout);
            let err = match handler.handle(&attempt_ctx, event).await {
                Ok(()) => {
                    debug!(event_id = event.id(), attempt, "event handled");
                    return AttemptOutcome::Handled { attempts: attempt };
                }
                Err(err) => err,
            };

            let err = err
                .set_tag(Pair::new(ATTEMPT_TAG, attempt))
                .set_tag(Pair::new(IS_LAST_ATTEMPT_TAG, is_last_attempt));
            span.record_error(&err, is_last_attempt);
            debug!(
                event_id = event.id(),
                attempt,
                is_last_attempt,
                error = %err,
                "event handling attempt failed"
            );

            let reported = if is_last_attempt { Some(&*event) } else { None };
            error_handler.handle_error(&attempt_ctx, err, reported).await;
        }

        AttemptOutcome::Exhausted {
            attempts: event.meta().attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::kv::Value;
    use crate::o11y::{Agent, MemoryAgent};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 `fail_times` 次失败，之后成功
    struct FlakyHandler {
        fail_times: u32,
        calls: AtomicU32,
        seen_attempts: Mutex<Vec<u32>>,
    }

    impl FlakyHandler {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times,
                calls: AtomicU32::new(0),
                seen_attempts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Handler for FlakyHandler {
        async fn handle(&self, ctx: &Context, event: &Event) -> Result<()> {
            assert!(ctx.deadline().is_some());
            self.seen_attempts
                .lock()
                .unwrap()
                .push(event.meta().attempts());
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_times {
                return Err(Error::new("handler error"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct SpyErrorHandler {
        reports: Mutex<Vec<(Error, Option<Event>)>>,
    }

    #[async_trait]
    impl ErrorHandler for SpyErrorHandler {
        async fn handle_error(&self, _ctx: &Context, err: Error, event: Option<&Event>) {
            self.reports.lock().unwrap().push((err, event.cloned()));
        }
    }

    fn mk_event() -> Event {
        Event::from_value(&Context::background(), "order.created", json!({"id": 1}))
    }

    async fn run(max_attempts: u32, fail_times: u32) -> (AttemptOutcome, FlakyHandler, SpyErrorHandler, Event, MemoryAgent) {
        let engine = AttemptEngine::new(max_attempts, Duration::from_secs(1));
        let handler = FlakyHandler::new(fail_times);
        let errors = SpyErrorHandler::default();
        let agent = MemoryAgent::new();
        let span = agent.start_span(&Context::background(), "consume");
        let mut event = mk_event();

        let outcome = engine
            .run(&Context::background(), &mut event, &handler, &errors, span.as_ref())
            .await;
        (outcome, handler, errors, event, agent)
    }

    #[tokio::test]
    async fn always_failing_handler_reports_every_attempt() {
        let (outcome, handler, errors, event, agent) = run(3, u32::MAX).await;

        assert_eq!(outcome, AttemptOutcome::Exhausted { attempts: 3 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*handler.seen_attempts.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(event.meta().attempts(), 3);

        let reports = errors.reports.lock().unwrap();
        assert_eq!(reports.len(), 3);
        for (i, (err, ev)) in reports.iter().enumerate() {
            let attempt = i as i64 + 1;
            let last = attempt == 3;
            assert_eq!(err.tag(ATTEMPT_TAG).and_then(Value::as_int), Some(attempt));
            assert_eq!(err.tag(IS_LAST_ATTEMPT_TAG).and_then(Value::as_bool), Some(last));
            assert_eq!(ev.is_some(), last);
        }
        assert_eq!(reports[2].1.as_ref().unwrap().id(), event.id());

        let span = &agent.spans()[0];
        assert!(span.has_failed());
        assert_eq!(span.events(), vec!["attempt 0", "attempt 1", "attempt 2"]);
    }

    #[tokio::test]
    async fn single_attempt_failure_carries_the_event() {
        let (outcome, _, errors, _, _) = run(1, u32::MAX).await;

        assert_eq!(outcome, AttemptOutcome::Exhausted { attempts: 1 });
        let reports = errors.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.is_some());
        assert_eq!(
            reports[0].0.tag(IS_LAST_ATTEMPT_TAG).and_then(Value::as_bool),
            Some(true)
        );
    }

    #[tokio::test]
    async fn success_on_attempt_k_stops_retrying() {
        let (outcome, handler, errors, _, agent) = run(5, 2).await;

        assert_eq!(outcome, AttemptOutcome::Handled { attempts: 3 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        let reports = errors.reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|(_, ev)| ev.is_none()));
        assert!(!agent.spans()[0].has_failed());
    }

    #[tokio::test]
    async fn exhausted_event_is_not_handled_again() {
        let engine = AttemptEngine::new(2, Duration::from_secs(1));
        let handler = FlakyHandler::new(u32::MAX);
        let errors = SpyErrorHandler::default();
        let agent = MemoryAgent::new();
        let span = agent.start_span(&Context::background(), "consume");
        let mut event = mk_event();

        engine
            .run(&Context::background(), &mut event, &handler, &errors, span.as_ref())
            .await;
        let again = engine
            .run(&Context::background(), &mut event, &handler, &errors, span.as_ref())
            .await;

        assert_eq!(again, AttemptOutcome::Exhausted { attempts: 2 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        assert_eq!(AttemptEngine::new(0, Duration::from_secs(1)).max_attempts(), 1);
    }
}
