//! 时间线 Agent（TimelineAgent）
//!
//! 在 `Context` 当前 Span 下开始的 Span 成为其子 Span；根 Span 完成时，
//! 整棵树逐行输出，每行带相对根 Span 开始时间的偏移与耗时：
//!
//! ```text
//! consume +0ms 12ms correlation_id=cor-1 is_dry_run=false
//! * attempt 0 +0ms
//! |- reserve stock +1ms 10ms order_id=o-1
//!    |- xadd +2ms 8ms error="connection reset" (failed)
//! ```
//!
//! 子 Span 完成时不输出；根 Span 完成时仍未完成的子 Span 显示为 `(open)`。
//! 适合本地开发与调试，默认通过 `tracing` 以 info 级别输出。
//!
use super::{Agent, Span};
use crate::context::Context;
use crate::error::Error;
use crate::kv::{self, Pair};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

type Writer = dyn Fn(&str) + Send + Sync;

const INDENT: &str = "   ";

#[derive(Clone)]
pub struct TimelineAgent {
    writer: Arc<Writer>,
}

impl Default for TimelineAgent {
    fn default() -> Self {
        Self::with_writer(|line: &str| tracing::info!(target: "relay::o11y::timeline", "{line}"))
    }
}

impl TimelineAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// 自定义输出，每行调用一次
    pub fn with_writer<F>(writer: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            writer: Arc::new(writer),
        }
    }
}

impl Agent for TimelineAgent {
    fn start_span(&self, ctx: &Context, name: &str) -> Arc<dyn Span> {
        if let Some(child) = ctx.span().and_then(|parent| parent.start_child(ctx, name)) {
            return child;
        }

        let now = Instant::now();
        Arc::new(TimelineSpan::new(self.writer.clone(), None, now, ctx, name))
    }
}

#[derive(Default)]
struct SpanState {
    pairs: Vec<Pair>,
    events: Vec<(Duration, String)>,
    errors: Vec<String>,
    failed: bool,
    finished_at: Option<Instant>,
    children: Vec<Arc<TimelineSpan>>,
}

struct TimelineSpan {
    writer: Arc<Writer>,
    // 根 Span 的开始时间；为 None 时自身即为根
    origin: Option<Instant>,
    started_at: Instant,
    name: String,
    state: Mutex<SpanState>,
}

impl TimelineSpan {
    fn new(
        writer: Arc<Writer>,
        origin: Option<Instant>,
        started_at: Instant,
        ctx: &Context,
        name: &str,
    ) -> Self {
        Self {
            writer,
            origin,
            started_at,
            name: name.to_string(),
            state: Mutex::new(SpanState {
                pairs: ctx.pairs(),
                ..SpanState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SpanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn origin(&self) -> Instant {
        self.origin.unwrap_or(self.started_at)
    }

    fn render(&self, depth: usize, lines: &mut Vec<String>) {
        let state = self.state();
        let origin = self.origin();

        let mut line = if depth == 0 {
            String::new()
        } else {
            format!("{}|- ", INDENT.repeat(depth - 1))
        };
        line.push_str(&format!(
            "{} +{}ms",
            self.name,
            self.started_at.duration_since(origin).as_millis()
        ));
        match state.finished_at {
            Some(finished_at) => {
                line.push_str(&format!(
                    " {}ms",
                    finished_at.duration_since(self.started_at).as_millis()
                ));
            }
            None => line.push_str(" (open)"),
        }
        if !state.pairs.is_empty() {
            line.push(' ');
            line.push_str(&kv::render(&state.pairs));
        }
        for err in &state.errors {
            line.push_str(&format!(" error={err:?}"));
        }
        if state.failed {
            line.push_str(" (failed)");
        }
        lines.push(line);

        for (offset, event) in &state.events {
            lines.push(format!(
                "{}* {event} +{}ms",
                INDENT.repeat(depth),
                offset.as_millis()
            ));
        }

        for child in &state.children {
            child.render(depth + 1, lines);
        }
    }
}

impl Span for TimelineSpan {
    fn add_pair(&self, pair: Pair) {
        self.state().pairs.push(pair);
    }

    fn add_event(&self, name: &str) {
        let offset = self.origin().elapsed();
        self.state().events.push((offset, name.to_string()));
    }

    fn record_error(&self, err: &Error, fatal: bool) {
        let mut state = self.state();
        state.errors.push(err.to_string());
        state.failed |= fatal;
    }

    fn complete(&self) {
        {
            let mut state = self.state();
            if state.finished_at.is_some() {
                return;
            }
            state.finished_at = Some(Instant::now());
        }
        if self.origin.is_some() {
            return;
        }

        let mut lines = Vec::new();
        self.render(0, &mut lines);
        for line in &lines {
            (self.writer)(line);
        }
    }

    fn start_child(&self, ctx: &Context, name: &str) -> Option<Arc<dyn Span>> {
        let child = Arc::new(TimelineSpan::new(
            self.writer.clone(),
            Some(self.origin()),
            Instant::now(),
            ctx,
            name,
        ));
        self.state().children.push(child.clone());
        Some(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::o11y::MemoryAgent;

    fn recording() -> (TimelineAgent, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let agent =
            TimelineAgent::with_writer(move |line: &str| sink.lock().unwrap().push(line.to_string()));
        (agent, lines)
    }

    #[test]
    fn tree_is_written_once_when_the_root_completes() {
        let (agent, lines) = recording();
        let ctx = Context::background().with_correlation_id("cor-1");

        let root = agent.start_span(&ctx, "consume");
        root.add_event("attempt 0");

        let child_ctx = ctx.clone().with_span(root.clone());
        let child = agent.start_span(&child_ctx, "reserve stock");
        child.add_pair(Pair::new("order_id", "o-1"));

        let grandchild = agent.start_span(&child_ctx.clone().with_span(child.clone()), "xadd");
        grandchild.record_error(&Error::new("connection reset"), true);

        grandchild.complete();
        child.complete();
        assert!(lines.lock().unwrap().is_empty());

        root.complete();
        root.complete();

        let lines = lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 4, "{lines:#?}");
        assert!(lines[0].starts_with("consume +0ms "));
        assert!(lines[0].contains("correlation_id=cor-1"));
        assert!(lines[1].starts_with("* attempt 0 +"));
        assert!(lines[2].starts_with("|- reserve stock +"));
        assert!(lines[2].contains("order_id=o-1"));
        assert!(lines[3].starts_with("   |- xadd +"));
        assert!(lines[3].contains("error=\"connection reset\""));
        assert!(lines[3].ends_with("(failed)"));
    }

    #[test]
    fn unfinished_children_are_shown_open() {
        let (agent, lines) = recording();
        let ctx = Context::background();

        let root = agent.start_span(&ctx, "emit");
        let _child = agent.start_span(&ctx.clone().with_span(root.clone()), "xadd");
        root.complete();

        let lines = lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].contains("(open)"));
        assert!(lines[1].starts_with("|- xadd +"));
        assert!(lines[1].contains("(open)"));
    }

    #[test]
    fn foreign_parent_starts_a_new_tree() {
        let (agent, lines) = recording();
        let memory = MemoryAgent::new();
        let ctx = Context::background();

        let parent = memory.start_span(&ctx, "outer");
        let span = agent.start_span(&ctx.clone().with_span(parent), "inner");
        span.complete();

        let lines = lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("inner +0ms "));
    }
}
