use serde::Deserialize;
use std::time::Duration;

/// 单次处理时限的下限
pub const MIN_CONSUME_TIMEOUT: Duration = Duration::from_secs(1);

/// 新建消费组的起始位置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    /// 仅消费建组之后追加的条目（`$`）
    #[default]
    Latest,
    /// 从流的第一条开始（`0`）
    Beginning,
}

impl StartFrom {
    pub fn as_id(&self) -> &'static str {
        match self {
            StartFrom::Latest => "$",
            StartFrom::Beginning => "0",
        }
    }
}

/// 失败恢复（`XAUTOCLAIM`）配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecovery {
    pub enabled: bool,
    /// 扫描间隔
    pub cadence: Duration,
}

impl FailureRecovery {
    pub fn every(cadence: Duration) -> Self {
        Self {
            enabled: true,
            cadence,
        }
    }
}

impl Default for FailureRecovery {
    fn default() -> Self {
        Self {
            enabled: false,
            cadence: Duration::from_secs(1),
        }
    }
}

/// Redis 订阅者配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// 单条事件最大处理次数，默认 1（不重试）
    pub max_attempts: u32,
    /// 单次读取/认领的最大条目数，默认 10
    pub read_capacity: usize,
    /// 单次处理时限，默认且最小 1s
    pub consume_timeout: Duration,
    /// 每次 `XREADGROUP` 的阻塞窗口，默认 1s；无新条目时循环重读
    pub read_block: Duration,
    /// 新建消费组的起始位置
    pub start_from: StartFrom,
    pub failure_recovery: FailureRecovery,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            read_capacity: 10,
            consume_timeout: MIN_CONSUME_TIMEOUT,
            read_block: Duration::from_secs(1),
            start_from: StartFrom::Latest,
            failure_recovery: FailureRecovery::default(),
        }
    }
}

impl SubscriberConfig {
    /// 将越界取值收敛到合法范围
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.read_capacity = self.read_capacity.max(1);
        self.consume_timeout = self.consume_timeout.max(MIN_CONSUME_TIMEOUT);
        if self.read_block.is_zero() {
            self.read_block = Duration::from_millis(1);
        }
        if self.failure_recovery.cadence.is_zero() {
            self.failure_recovery.cadence = FailureRecovery::default().cadence;
        }
        self
    }

    /// 条目被视为遗弃前的空闲时长：`max_attempts × consume_timeout`
    pub fn idle_timeout(&self) -> Duration {
        self.consume_timeout * self.max_attempts
    }
}
