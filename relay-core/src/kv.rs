//! 键值对（Pair）
//!
//! 错误标签、日志字段与 Span 属性共用的结构化键值表示，
//! 支持脱敏值：脱敏后的键值对对外只暴露 `redacted`。
//!
use std::fmt;

/// 脱敏值的统一展示
pub const REDACTED: &str = "redacted";

/// 约定俗成的键名，保证各模块输出一致
pub mod keys {
    pub const BUILD_ID: &str = "build_id";
    pub const SERVICE_HOST: &str = "service_host";
    pub const SERVICE_NAME: &str = "service_name";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const TRIGGERED_BY: &str = "triggered_by";
    pub const IS_DRY_RUN: &str = "is_dry_run";
}

/// 键值对中的值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Str(v.clone())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

macro_rules! int_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

int_value!(i32, i64, u32, u64, usize);

/// 键值对：键 + 值，值可被脱敏
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    key: String,
    value: Value,
    obfuscated: bool,
}

impl Pair {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            obfuscated: false,
        }
    }

    /// 创建脱敏键值对：原始值不会被保存
    pub fn obfuscated(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::Str(REDACTED.to_string()),
            obfuscated: true,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_obfuscated(&self) -> bool {
        self.obfuscated
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// 将键值对渲染为 `k=v k2=v2`，用于日志字段
pub fn render(pairs: &[Pair]) -> String {
    pairs
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
