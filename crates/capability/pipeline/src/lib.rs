//! 采集流水线：有界队列 -> 批量 -> 单次批量写入。
//!
//! 生产者（各会话）通过 [`PipelineHandle::enqueue`] 投递样本，队列满时等待；
//! 唯一的消费者任务在批量达到 `batch_size` 或距上次刷盘超过
//! `flush_interval` 时调用一次写入器。写入失败只记录，不重试。

mod writer;

pub use writer::{NoopWriter, SampleWriter, StorageSampleWriter};

use domain::{Sample, now_epoch_ms};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 流水线错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline closed")]
    Closed,
    #[error("writer error: {0}")]
    Writer(String),
    #[error("consumer task failed: {0}")]
    Worker(String),
}

/// 流水线参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 队列容量（样本数）。
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 50_000,
            batch_size: 5_000,
            flush_interval: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.capacity < self.batch_size {
            self.capacity = self.batch_size;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = Duration::from_millis(1);
        }
        self
    }
}

/// 流水线计数器。
#[derive(Debug, Default)]
struct PipelineStats {
    received: AtomicU64,
    processed: AtomicU64,
    error_batches: AtomicU64,
    error_samples: AtomicU64,
    dropped_invalid: AtomicU64,
    batches: AtomicU64,
    last_flush_ms: AtomicI64,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub error_batches: u64,
    pub error_samples: u64,
    pub dropped_invalid: u64,
    pub batches: u64,
    /// 上次刷盘时间（Unix 毫秒）；尚未刷盘为 0。
    pub last_flush_ms: i64,
    /// 当前排队样本数。
    pub queued: u64,
}

/// 生产者句柄，可在多个会话间克隆。
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Sample>,
    stats: Arc<PipelineStats>,
    closed: CancellationToken,
}

impl PipelineHandle {
    /// 投递样本；队列满时等待，非有限值计为非法丢弃。
    ///
    /// 返回实际入队数量。流水线关闭后返回 [`PipelineError::Closed`]。
    pub async fn enqueue(&self, samples: Vec<Sample>) -> Result<usize, PipelineError> {
        if self.closed.is_cancelled() {
            return Err(PipelineError::Closed);
        }
        let mut accepted = 0usize;
        for sample in samples {
            if !sample.value.is_finite() {
                self.stats.dropped_invalid.fetch_add(1, Ordering::Relaxed);
                fleet_telemetry::record_dropped_invalid(1);
                continue;
            }
            let sample = match self.tx.try_send(sample) {
                Ok(()) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    accepted += 1;
                    continue;
                }
                Err(TrySendError::Closed(_)) => return Err(PipelineError::Closed),
                Err(TrySendError::Full(sample)) => sample,
            };
            fleet_telemetry::record_backpressure();
            self.tx
                .send(sample)
                .await
                .map_err(|_| PipelineError::Closed)?;
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            accepted += 1;
        }
        Ok(accepted)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// 采集流水线。
pub struct Pipeline {
    handle: PipelineHandle,
    capacity: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// 创建队列并启动消费者任务。
    pub fn start(writer: Arc<dyn SampleWriter>, config: PipelineConfig) -> Self {
        let config = config.sanitized();
        let (tx, rx) = mpsc::channel(config.capacity);
        let stats = Arc::new(PipelineStats::default());
        let closed = CancellationToken::new();
        let consumer = Consumer {
            rx,
            writer,
            stats: stats.clone(),
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
        };
        let worker = tokio::spawn(consumer.run(closed.clone()));
        tracing::info!(
            target: "fleet.ingest",
            capacity = config.capacity,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "pipeline_started"
        );
        Self {
            handle: PipelineHandle { tx, stats, closed },
            capacity: config.capacity,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub async fn enqueue(&self, samples: Vec<Sample>) -> Result<usize, PipelineError> {
        self.handle.enqueue(samples).await
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        let stats = &self.handle.stats;
        let available = self.handle.tx.capacity();
        PipelineStatsSnapshot {
            received: stats.received.load(Ordering::Relaxed),
            processed: stats.processed.load(Ordering::Relaxed),
            error_batches: stats.error_batches.load(Ordering::Relaxed),
            error_samples: stats.error_samples.load(Ordering::Relaxed),
            dropped_invalid: stats.dropped_invalid.load(Ordering::Relaxed),
            batches: stats.batches.load(Ordering::Relaxed),
            last_flush_ms: stats.last_flush_ms.load(Ordering::Relaxed),
            queued: self.capacity.saturating_sub(available) as u64,
        }
    }

    /// 关闭队列，排空已入队样本并完成最后一次刷盘。重复调用无副作用。
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.handle.closed.cancel();
        let worker = self.worker.lock().ok().and_then(|mut guard| guard.take());
        let Some(worker) = worker else {
            return Ok(());
        };
        worker
            .await
            .map_err(|err| PipelineError::Worker(err.to_string()))?;
        let stats = self.stats();
        tracing::info!(
            target: "fleet.ingest",
            received = stats.received,
            processed = stats.processed,
            error_batches = stats.error_batches,
            "pipeline_stopped"
        );
        Ok(())
    }
}

struct Consumer {
    rx: mpsc::Receiver<Sample>,
    writer: Arc<dyn SampleWriter>,
    stats: Arc<PipelineStats>,
    batch_size: usize,
    flush_interval: Duration,
}

impl Consumer {
    async fn run(mut self, closed: CancellationToken) {
        let mut batch: Vec<Sample> = Vec::with_capacity(self.batch_size);
        let mut last_flush = Instant::now();
        loop {
            let deadline = last_flush + self.flush_interval;
            let limit = self.batch_size - batch.len();
            tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                received = self.rx.recv_many(&mut batch, limit) => {
                    if received == 0 {
                        break;
                    }
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch).await;
                        last_flush = Instant::now();
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.flush(&mut batch).await;
                    last_flush = Instant::now();
                }
            }
        }

        // 拒绝新样本，排空队列中剩余部分
        self.rx.close();
        while let Some(sample) = self.rx.recv().await {
            batch.push(sample);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch).await;
            }
        }
        self.flush(&mut batch).await;
    }

    async fn flush(&self, batch: &mut Vec<Sample>) {
        if batch.is_empty() {
            return;
        }
        let samples = std::mem::replace(batch, Vec::with_capacity(self.batch_size));
        let started = Instant::now();
        match self.writer.write_batch(&samples).await {
            Ok(_) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.stats
                    .processed
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                fleet_telemetry::record_batch_written(samples.len() as u64, latency_ms);
                tracing::debug!(
                    target: "fleet.ingest",
                    samples = samples.len(),
                    latency_ms,
                    "batch_written"
                );
            }
            Err(err) => {
                self.stats.error_batches.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .error_samples
                    .fetch_add(samples.len() as u64, Ordering::Relaxed);
                fleet_telemetry::record_write_batch_failure();
                tracing::error!(
                    target: "fleet.ingest",
                    error = %err,
                    samples = samples.len(),
                    "batch_write_failed"
                );
            }
        }
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_flush_ms
            .store(now_epoch_ms(), Ordering::Relaxed);
    }
}
