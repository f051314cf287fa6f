/// 协议层上报的原始值。
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// Unix 毫秒时间戳。
    DateTime(i64),
}

impl TagValue {
    /// 从 JSON 值构造（用于写入请求）。
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TagValue::Null,
            serde_json::Value::Bool(v) => TagValue::Bool(*v),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    TagValue::Int(v)
                } else if let Some(v) = n.as_u64() {
                    TagValue::UInt(v)
                } else {
                    TagValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(v) => TagValue::String(v.clone()),
            other => TagValue::String(other.to_string()),
        }
    }
}

/// 数据质量。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
}

/// 一次数据变化通知。
#[derive(Debug, Clone, PartialEq)]
pub struct TagNotification {
    pub value: TagValue,
    pub quality: Quality,
    /// 源时间戳（毫秒）；缺失时由会话用接收时间补齐。
    pub source_ts_ms: Option<i64>,
}

/// 写入存储的测点样本。
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub device_id: i64,
    pub tag_name: String,
    pub value: f64,
    pub ts_ms: i64,
}

/// 获取当前 Unix 时间戳（毫秒）
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
