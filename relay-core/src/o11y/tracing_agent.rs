use super::{Agent, Span};
use crate::context::Context;
use crate::error::Error;
use crate::kv::Pair;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// 将 Span 转为 tracing span 与事件的 Agent
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAgent;

struct TracingSpan {
    span: tracing::Span,
    started_at: Instant,
    completed: AtomicBool,
}

impl Span for TracingSpan {
    fn add_pair(&self, pair: Pair) {
        tracing::debug!(parent: &self.span, key = pair.key(), value = %pair.value(), "span pair");
    }

    fn add_event(&self, name: &str) {
        tracing::debug!(parent: &self.span, event = name, "span event");
    }

    fn record_error(&self, err: &Error, fatal: bool) {
        if fatal {
            tracing::error!(parent: &self.span, error = %err, "span failed");
        } else {
            tracing::warn!(parent: &self.span, error = %err, "span error");
        }
    }

    fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        tracing::debug!(parent: &self.span, elapsed_ms, "span completed");
    }
}

impl Agent for TracingAgent {
    fn start_span(&self, ctx: &Context, name: &str) -> Arc<dyn Span> {
        let span = tracing::info_span!(
            "relay",
            otel.name = name,
            correlation_id = ctx.correlation_id().unwrap_or_default(),
            is_dry_run = ctx.is_dry_run(),
        );

        Arc::new(TracingSpan {
            span,
            started_at: Instant::now(),
            completed: AtomicBool::new(false),
        })
    }
}
