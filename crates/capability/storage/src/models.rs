//! 存储层记录类型
//!
//! 领域类型（`Device`、`Tag`、`Sample` 等）直接在存储接口上流转，
//! 这里只放存储侧特有的投影。

use domain::{DeviceId, SessionId};
use serde::{Deserialize, Serialize};

/// 设备与会话的分配关系。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAssignment {
    pub device_id: DeviceId,
    pub session_id: SessionId,
}

/// 设备有效标签数（类型标签 ∪ 单设备标签，同名只算一次）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTagCount {
    pub device_id: DeviceId,
    pub tag_count: usize,
}

/// 最近一次有效值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastValueRecord {
    pub device_id: DeviceId,
    pub tag_name: String,
    pub value: f64,
    pub ts_ms: i64,
}

/// 写入请求的执行结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    Failed(String),
}

impl WriteOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            WriteOutcome::Success => "success",
            WriteOutcome::Failed(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            WriteOutcome::Success => None,
            WriteOutcome::Failed(message) => Some(message.as_str()),
        }
    }
}
