//! 协议值 -> f64 的规整。
//!
//! 纯函数，无 I/O。会话在通知到达时调用 [`to_sample`]，
//! 只有 Good 质量且值非空的通知才会进入采集流水线。

use domain::{Quality, Sample, TagNotification, TagValue};

/// 通知被丢弃的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("quality is not good: {0:?}")]
    NotGood(Quality),
    #[error("value is null")]
    NullValue,
}

/// 把协议值转换为 f64。
///
/// - `true` -> 1.0，`false` -> 0.0
/// - 整数按 `as f64` 转换，浮点原样返回（含 NaN/Inf，由流水线按非法值丢弃）
/// - 字符串去掉首尾空白后解析，解析失败得到 0.0
/// - 时间按 Unix 毫秒
/// - `Null` 返回 `None`
pub fn coerce(value: &TagValue) -> Option<f64> {
    match value {
        TagValue::Null => None,
        TagValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        TagValue::Int(v) => Some(*v as f64),
        TagValue::UInt(v) => Some(*v as f64),
        TagValue::Float(v) => Some(*v),
        TagValue::String(v) => Some(v.trim().parse::<f64>().unwrap_or(0.0)),
        TagValue::DateTime(ms) => Some(*ms as f64),
    }
}

/// 通知 -> 样本。源时间戳缺失时使用 `received_at_ms`。
pub fn to_sample(
    notification: &TagNotification,
    device_id: i64,
    tag_name: &str,
    received_at_ms: i64,
) -> Result<Sample, DropReason> {
    if notification.quality != Quality::Good {
        return Err(DropReason::NotGood(notification.quality));
    }
    let value = coerce(&notification.value).ok_or(DropReason::NullValue)?;
    Ok(Sample {
        device_id,
        tag_name: tag_name.to_string(),
        value,
        ts_ms: notification.source_ts_ms.unwrap_or(received_at_ms),
    })
}
