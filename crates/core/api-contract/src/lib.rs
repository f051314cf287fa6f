//! 稳定的 DTO 与 API 响应契约。
//!
//! 只包含序列化结构，不依赖领域 crate；转换在 `fleet-agent` 中完成。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 健康检查响应。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDto {
    pub ok: bool,
    pub drivers_running: usize,
    pub sessions_total: usize,
    pub sessions_connected: usize,
}

/// 驱动运行状态。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatusDto {
    pub driver_id: i64,
    pub name: String,
    pub sessions: Vec<SessionStatusDto>,
    pub pipeline: PipelineStatsDto,
    pub operations_in_flight: usize,
    pub required_sessions: usize,
    pub overflowed_devices: Vec<i64>,
    pub unassigned_devices: Vec<i64>,
    pub last_sync: Option<SyncReportDto>,
}

/// 会话状态。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusDto {
    pub session_id: i32,
    /// `disconnected` / `connecting` / `connected` / `reconnecting` / `error` / `stopped`
    pub state: String,
    pub error: Option<String>,
    pub assigned_devices: usize,
    pub tag_count: usize,
    pub messages_received: u64,
    pub dropped: u64,
    pub reconnects: u64,
}

/// 流水线计数。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatsDto {
    pub received: u64,
    pub processed: u64,
    pub queued: u64,
    pub batches: u64,
    pub error_batches: u64,
    pub error_samples: u64,
    pub dropped_invalid: u64,
    pub last_flush_ms: i64,
}

/// 对账结果摘要。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReportDto {
    pub desired_channels: usize,
    pub desired_devices: usize,
    pub already_present: usize,
    pub channels_added: usize,
    pub devices_added: usize,
    pub tags_added: usize,
    pub extra_channels: Vec<String>,
    pub extra_devices: Vec<String>,
    pub failed: Vec<String>,
    pub still_missing: Vec<String>,
    pub total_ms: u64,
}

/// 进程级计数器快照。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshotDto {
    pub notifications_received: u64,
    pub samples_dropped_bad_quality: u64,
    pub samples_dropped_invalid: u64,
    pub samples_written: u64,
    pub write_batch_failure: u64,
    pub backpressure: u64,
    pub write_latency_ms_total: u64,
    pub write_latency_ms_count: u64,
    pub provision_success: u64,
    pub provision_failure: u64,
    pub provision_skipped: u64,
    pub reconcile_runs: u64,
    pub reconcile_added: u64,
    pub reconcile_failed: u64,
    pub session_reconnects: u64,
    pub session_restarts: u64,
    pub write_back_success: u64,
    pub write_back_failure: u64,
}
