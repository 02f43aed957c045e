#![allow(dead_code)]

use async_trait::async_trait;
use relay_core::pubsub::{ATTEMPT_TAG, ErrorHandler, Event, Handler, IS_LAST_ATTEMPT_TAG};
use relay_core::{Category, Context, Error, Result};
use relay_redis::{
    AutoClaimed, GroupCreation, RedisSubscriber, StartFrom, StreamBroker, StreamEntry,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ---------------- 内存流代理（模拟 Redis Streams 语义） ----------------

struct Entry {
    seq: u64,
    id: String,
    payload: Option<Vec<u8>>,
}

struct Pending {
    id: String,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct Group {
    next_index: usize,
    pending: BTreeMap<u64, Pending>,
    acked: Vec<String>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<Entry>,
    groups: HashMap<String, Group>,
    last_capacity: Option<usize>,
}

#[derive(Default)]
struct Failures {
    create_group: u32,
    read: u32,
    claim: u32,
    ack: u32,
    append: u32,
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
    seq: u64,
    skew: Duration,
    read_latency: Duration,
    failures: Failures,
}

impl State {
    fn now(&self) -> Instant {
        Instant::now() + self.skew
    }
}

/// 进程内的流代理：流、消费组、待处理列表与空闲时长
#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<State>,
    appended: tokio::sync::Notify,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 让时间“流逝”，使待处理条目的空闲时长增加
    pub fn advance(&self, by: Duration) {
        self.state.lock().unwrap().skew += by;
    }

    /// 读取到条目后延迟返回，模拟条目已投递但响应仍在路上
    pub fn delay_reads(&self, by: Duration) {
        self.state.lock().unwrap().read_latency = by;
    }

    pub fn fail_next_group_creates(&self, n: u32) {
        self.state.lock().unwrap().failures.create_group = n;
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().unwrap().failures.read = n;
    }

    pub fn fail_next_claims(&self, n: u32) {
        self.state.lock().unwrap().failures.claim = n;
    }

    pub fn fail_next_acks(&self, n: u32) {
        self.state.lock().unwrap().failures.ack = n;
    }

    pub fn fail_next_appends(&self, n: u32) {
        self.state.lock().unwrap().failures.append = n;
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group))
    }

    pub fn entries_len(&self, stream: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .map_or(0, |s| s.entries.len())
    }

    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        self.with_group(stream, group, |g| g.pending.len())
    }

    pub fn acked(&self, stream: &str, group: &str) -> Vec<String> {
        self.with_group(stream, group, |g| g.acked.clone())
    }

    pub fn last_capacity(&self, stream: &str) -> Option<usize> {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .and_then(|s| s.last_capacity)
    }

    /// 直接追加原始条目（可缺失 event 字段）
    pub fn append_raw(&self, stream: &str, payload: Option<Vec<u8>>) -> String {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.seq += 1;
            let seq = state.seq;
            let id = format!("{seq}-0");
            state
                .streams
                .entry(stream.to_string())
                .or_default()
                .entries
                .push(Entry {
                    seq,
                    id: id.clone(),
                    payload,
                });
            id
        };
        self.appended.notify_waiters();
        id
    }

    fn with_group<T: Default>(&self, stream: &str, group: &str, f: impl FnOnce(&Group) -> T) -> T {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(f)
            .unwrap_or_default()
    }

    fn try_read(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut state = self.state.lock().unwrap();
        if take_failure(&mut state.failures.read) {
            return Err(Error::transient("redis xreadgroup: connection refused"));
        }

        let now = state.now();
        let mut out = Vec::new();
        for name in streams {
            let Some(stream) = state.streams.get_mut(name) else {
                return Err(Error::transient("NOGROUP no such key"));
            };
            let Some(g) = stream.groups.get_mut(group) else {
                return Err(Error::transient("NOGROUP no such consumer group"));
            };

            while out.len() < count && g.next_index < stream.entries.len() {
                let entry = &stream.entries[g.next_index];
                g.next_index += 1;
                g.pending.insert(
                    entry.seq,
                    Pending {
                        id: entry.id.clone(),
                        consumer: consumer.to_string(),
                        delivered_at: now,
                    },
                );
                out.push(StreamEntry {
                    stream: name.clone(),
                    id: entry.id.clone(),
                    payload: entry.payload.clone(),
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StreamBroker for FakeBroker {
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartFrom,
    ) -> Result<GroupCreation> {
        let mut state = self.state.lock().unwrap();
        if take_failure(&mut state.failures.create_group) {
            return Err(Error::transient("redis xgroup create: connection refused"));
        }

        let stream = state.streams.entry(stream.to_string()).or_default();
        if stream.groups.contains_key(group) {
            return Ok(GroupCreation::AlreadyExists);
        }

        let next_index = match start {
            StartFrom::Latest => stream.entries.len(),
            StartFrom::Beginning => 0,
        };
        stream.groups.insert(
            group.to_string(),
            Group {
                next_index,
                ..Default::default()
            },
        );
        Ok(GroupCreation::Created)
    }

    async fn read_group(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.try_read(streams, group, consumer, count)?;
            if !entries.is_empty() {
                let latency = self.state.lock().unwrap().read_latency;
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                return Ok(entries);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<AutoClaimed> {
        let mut state = self.state.lock().unwrap();
        if take_failure(&mut state.failures.claim) {
            return Err(Error::transient("redis xautoclaim: connection refused"));
        }

        let now = state.now();
        let Some(s) = state.streams.get_mut(stream) else {
            return Err(Error::transient("NOGROUP no such key"));
        };
        let Some(g) = s.groups.get_mut(group) else {
            return Err(Error::transient("NOGROUP no such consumer group"));
        };

        let mut entries = Vec::new();
        for (seq, pending) in g.pending.iter_mut() {
            if entries.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;

            let payload = s
                .entries
                .iter()
                .find(|e| e.seq == *seq)
                .and_then(|e| e.payload.clone());
            entries.push(StreamEntry {
                stream: stream.to_string(),
                id: pending.id.clone(),
                payload,
            });
        }

        Ok(AutoClaimed {
            next_start_id: "0-0".to_string(),
            entries,
        })
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if take_failure(&mut state.failures.ack) {
            return Err(Error::transient("redis xack: connection refused"));
        }

        if let Some(g) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            let before = g.pending.len();
            g.pending.retain(|_, p| p.id != id);
            if g.pending.len() < before {
                g.acked.push(id.to_string());
            }
        }
        Ok(())
    }

    async fn append(&self, stream: &str, capacity: usize, payload: &[u8]) -> Result<String> {
        {
            let mut state = self.state.lock().unwrap();
            if take_failure(&mut state.failures.append) {
                return Err(Error::transient("redis xadd: connection refused"));
            }
            state
                .streams
                .entry(stream.to_string())
                .or_default()
                .last_capacity = Some(capacity);
        }
        Ok(self.append_raw(stream, Some(payload.to_vec())))
    }
}

// ---------------- 处理器 ----------------

/// 第 `fail_until` 次（含）之前的处理均失败
pub struct ScriptedHandler {
    fail_until: u32,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedHandler {
    pub fn always_failing() -> Arc<Self> {
        Self::failing_until(u32::MAX)
    }

    pub fn succeeding() -> Arc<Self> {
        Self::failing_until(0)
    }

    pub fn failing_until(fail_until: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_until,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// (event id, attempt)
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn handled_event_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.calls().into_iter().map(|(id, _)| id).collect();
        ids.dedup();
        ids
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    async fn handle(&self, _ctx: &Context, event: &Event) -> Result<()> {
        let attempt = event.meta().attempts();
        self.calls
            .lock()
            .unwrap()
            .push((event.id().to_string(), attempt));

        if attempt <= self.fail_until {
            return Err(Error::new("handler failed"));
        }
        Ok(())
    }
}

pub struct Report {
    pub error: Error,
    pub event: Option<Event>,
}

impl Report {
    pub fn attempt(&self) -> Option<i64> {
        self.error.tag(ATTEMPT_TAG).and_then(|v| v.as_int())
    }

    pub fn is_last_attempt(&self) -> Option<bool> {
        self.error.tag(IS_LAST_ATTEMPT_TAG).and_then(|v| v.as_bool())
    }

    pub fn is(&self, category: Category) -> bool {
        self.error.is(category)
    }
}

#[derive(Default)]
pub struct SpyErrorHandler {
    reports: Mutex<Vec<Report>>,
    count: AtomicUsize,
}

impl SpyErrorHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn with_reports<T>(&self, f: impl FnOnce(&[Report]) -> T) -> T {
        f(&self.reports.lock().unwrap())
    }
}

#[async_trait]
impl ErrorHandler for SpyErrorHandler {
    async fn handle_error(&self, _ctx: &Context, err: Error, event: Option<&Event>) {
        self.reports.lock().unwrap().push(Report {
            error: err,
            event: event.cloned(),
        });
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------- 工具 ----------------

/// 轮询直到条件成立或超时
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for: {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 在后台运行消费循环
pub fn spawn_consume(
    subscriber: Arc<RedisSubscriber>,
    ctx: Context,
    handler: Arc<dyn Handler>,
    error_handler: Arc<dyn ErrorHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        use relay_core::pubsub::Subscriber;
        subscriber.consume(&ctx, handler, error_handler).await;
    })
}

/// 取消上下文并等待消费循环退出
pub async fn stop(ctx: &Context, task: JoinHandle<()>) {
    ctx.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("consume loop must stop after cancellation")
        .expect("consume loop must not panic");
}
