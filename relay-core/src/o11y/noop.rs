use super::{Agent, Span};
use crate::context::Context;
use crate::error::Error;
use crate::kv::Pair;
use std::sync::Arc;

/// 不做任何记录的 Agent，作为默认实现
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAgent;

struct NoopSpan;

impl Span for NoopSpan {
    fn add_pair(&self, _pair: Pair) {}
    fn add_event(&self, _name: &str) {}
    fn record_error(&self, _err: &Error, _fatal: bool) {}
    fn complete(&self) {}
}

impl Agent for NoopAgent {
    fn start_span(&self, _ctx: &Context, _name: &str) -> Arc<dyn Span> {
        Arc::new(NoopSpan)
    }
}
