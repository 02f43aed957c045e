//! Redis Stream 声明与路由（StreamRouter）
//!
//! - 发布侧：`Stream::for_publisher` 声明流名与路由到该流的事件名；
//! - 订阅侧：`streams_for_subscriber` 仅声明需要读取的流名；
//! - `StreamRouter`：构造时一次性建立 事件名 -> 流名 的查找表，并记录每个流的近似容量。
//!
use std::collections::HashMap;

/// 流的默认近似容量（`XADD ... MAXLEN ~ capacity`）
pub const DEFAULT_STREAM_CAPACITY: usize = 1_000_000;

/// Redis Stream 声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    name: String,
    events: Vec<String>,
    capacity: usize,
}

impl Stream {
    /// 发布侧声明：这些事件名将被追加到名为 `name` 的流
    pub fn for_publisher<I, S>(name: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            events: events.into_iter().map(Into::into).collect(),
            capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// 设置近似容量；同一流重复声明时以后者为准
    pub fn capped_at(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 订阅侧声明：需要读取的流
pub fn streams_for_subscriber<I, S>(names: I) -> Vec<Stream>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(|name| Stream {
            name: name.into(),
            events: Vec::new(),
            capacity: DEFAULT_STREAM_CAPACITY,
        })
        .collect()
}

/// 目标流：名称与近似容量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub stream: &'a str,
    pub capacity: usize,
}

/// 事件名 -> 流 的路由表
#[derive(Debug, Clone, Default)]
pub struct StreamRouter {
    stream_for_event: HashMap<String, String>,
    capacities: HashMap<String, usize>,
}

impl StreamRouter {
    /// 同一事件名出现在多个流中时，以后声明者为准
    pub fn new(streams: &[Stream]) -> Self {
        let mut stream_for_event = HashMap::new();
        let mut capacities = HashMap::new();

        for stream in streams {
            for event in &stream.events {
                stream_for_event.insert(event.clone(), stream.name.clone());
            }
            capacities.insert(stream.name.clone(), stream.capacity);
        }

        Self {
            stream_for_event,
            capacities,
        }
    }

    pub fn route(&self, event_name: &str) -> Option<Route<'_>> {
        let stream = self.stream_for_event.get(event_name)?;
        let capacity = self
            .capacities
            .get(stream)
            .copied()
            .unwrap_or(DEFAULT_STREAM_CAPACITY);

        Some(Route {
            stream: stream.as_str(),
            capacity,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.stream_for_event.is_empty()
    }
}
