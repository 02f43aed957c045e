use super::{Agent, Span};
use crate::context::Context;
use crate::error::Error;
use crate::kv::{Pair, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// 内存 Agent：保存所有 Span，供测试断言
#[derive(Clone, Default)]
pub struct MemoryAgent {
    spans: Arc<Mutex<Vec<Arc<MemorySpan>>>>,
}

impl MemoryAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有已创建的 Span（按创建顺序）
    pub fn spans(&self) -> Vec<Arc<MemorySpan>> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 指定名称的 Span（按创建顺序）
    pub fn spans_named(&self, name: &str) -> Vec<Arc<MemorySpan>> {
        self.spans()
            .into_iter()
            .filter(|s| s.name() == name)
            .collect()
    }
}

impl Agent for MemoryAgent {
    fn start_span(&self, ctx: &Context, name: &str) -> Arc<dyn Span> {
        let span = Arc::new(MemorySpan {
            name: name.to_string(),
            pairs: Mutex::new(ctx.pairs()),
            events: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        });
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span.clone());
        span
    }
}

/// 内存 Span
pub struct MemorySpan {
    name: String,
    pairs: Mutex<Vec<Pair>>,
    events: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    failed: AtomicBool,
    completed: AtomicBool,
}

impl MemorySpan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pairs(&self) -> Vec<Pair> {
        self.pairs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// 是否记录过错误
    pub fn has_errored(&self) -> bool {
        !self.errors.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// 是否以失败告终
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// 是否存在键值均匹配的属性
    pub fn pair_matches(&self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| p.key() == key && *p.value() == value)
    }
}

impl Span for MemorySpan {
    fn add_pair(&self, pair: Pair) {
        self.pairs.lock().unwrap_or_else(PoisonError::into_inner).push(pair);
    }

    fn add_event(&self, name: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());
    }

    fn record_error(&self, err: &Error, fatal: bool) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err.to_string());
        if fatal {
            self.failed.store(true, Ordering::Release);
        }
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::Release);
    }
}
