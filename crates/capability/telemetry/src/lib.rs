//! 追踪初始化、请求 ID 与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
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

/// 进程级计数器。
pub struct TelemetryMetrics {
    notifications_received: AtomicU64,
    samples_dropped_bad_quality: AtomicU64,
    samples_dropped_invalid: AtomicU64,
    samples_written: AtomicU64,
    write_batch_failure: AtomicU64,
    backpressure: AtomicU64,
    write_latency_ms_total: AtomicU64,
    write_latency_ms_count: AtomicU64,
    provision_success: AtomicU64,
    provision_failure: AtomicU64,
    provision_skipped: AtomicU64,
    reconcile_runs: AtomicU64,
    reconcile_added: AtomicU64,
    reconcile_failed: AtomicU64,
    session_reconnects: AtomicU64,
    session_restarts: AtomicU64,
    write_back_success: AtomicU64,
    write_back_failure: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            notifications_received: AtomicU64::new(0),
            samples_dropped_bad_quality: AtomicU64::new(0),
            samples_dropped_invalid: AtomicU64::new(0),
            samples_written: AtomicU64::new(0),
            write_batch_failure: AtomicU64::new(0),
            backpressure: AtomicU64::new(0),
            write_latency_ms_total: AtomicU64::new(0),
            write_latency_ms_count: AtomicU64::new(0),
            provision_success: AtomicU64::new(0),
            provision_failure: AtomicU64::new(0),
            provision_skipped: AtomicU64::new(0),
            reconcile_runs: AtomicU64::new(0),
            reconcile_added: AtomicU64::new(0),
            reconcile_failed: AtomicU64::new(0),
            session_reconnects: AtomicU64::new(0),
            session_restarts: AtomicU64::new(0),
            write_back_success: AtomicU64::new(0),
            write_back_failure: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            samples_dropped_bad_quality: self.samples_dropped_bad_quality.load(Ordering::Relaxed),
            samples_dropped_invalid: self.samples_dropped_invalid.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            write_batch_failure: self.write_batch_failure.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            write_latency_ms_total: self.write_latency_ms_total.load(Ordering::Relaxed),
            write_latency_ms_count: self.write_latency_ms_count.load(Ordering::Relaxed),
            provision_success: self.provision_success.load(Ordering::Relaxed),
            provision_failure: self.provision_failure.load(Ordering::Relaxed),
            provision_skipped: self.provision_skipped.load(Ordering::Relaxed),
            reconcile_runs: self.reconcile_runs.load(Ordering::Relaxed),
            reconcile_added: self.reconcile_added.load(Ordering::Relaxed),
            reconcile_failed: self.reconcile_failed.load(Ordering::Relaxed),
            session_reconnects: self.session_reconnects.load(Ordering::Relaxed),
            session_restarts: self.session_restarts.load(Ordering::Relaxed),
            write_back_success: self.write_back_success.load(Ordering::Relaxed),
            write_back_failure: self.write_back_failure.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录收到的数据变化通知数。
pub fn record_notifications(count: u64) {
    metrics()
        .notifications_received
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录因质量为 Bad 被丢弃的样本。
pub fn record_dropped_bad_quality() {
    metrics()
        .samples_dropped_bad_quality
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录无法转换为有限数值而被丢弃的样本。
pub fn record_dropped_invalid(count: u64) {
    metrics()
        .samples_dropped_invalid
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录一次批量写入成功及其延迟。
pub fn record_batch_written(samples: u64, latency_ms: u64) {
    let metrics = metrics();
    metrics.samples_written.fetch_add(samples, Ordering::Relaxed);
    metrics
        .write_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .write_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_batch_failure() {
    metrics()
        .write_batch_failure
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录入队时缓冲已满需要等待。
pub fn record_backpressure() {
    metrics().backpressure.fetch_add(1, Ordering::Relaxed);
}

pub fn record_provision_success() {
    metrics().provision_success.fetch_add(1, Ordering::Relaxed);
}

pub fn record_provision_failure() {
    metrics().provision_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录因设备已加锁或状态已变更而跳过的下发。
pub fn record_provision_skipped() {
    metrics().provision_skipped.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次对账结果。
pub fn record_reconcile_run(added: u64, failed: u64) {
    let metrics = metrics();
    metrics.reconcile_runs.fetch_add(1, Ordering::Relaxed);
    metrics.reconcile_added.fetch_add(added, Ordering::Relaxed);
    metrics.reconcile_failed.fetch_add(failed, Ordering::Relaxed);
}

pub fn record_session_reconnect() {
    metrics().session_reconnects.fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_restart() {
    metrics().session_restarts.fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_back_success() {
    metrics().write_back_success.fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_back_failure() {
    metrics().write_back_failure.fetch_add(1, Ordering::Relaxed);
}
