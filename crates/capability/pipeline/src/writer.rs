//! 批量写入器。

use crate::PipelineError;
use async_trait::async_trait;
use domain::Sample;
use fleet_storage::{RealtimeStore, SampleStore};
use std::sync::Arc;

/// 一次刷盘对应一次 `write_batch` 调用。
#[async_trait]
pub trait SampleWriter: Send + Sync {
    async fn write_batch(&self, samples: &[Sample]) -> Result<usize, PipelineError>;
}

/// 空写入器（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopWriter;

#[async_trait]
impl SampleWriter for NoopWriter {
    async fn write_batch(&self, samples: &[Sample]) -> Result<usize, PipelineError> {
        Ok(samples.len())
    }
}

/// 基于存储层的写入器（样本表 + 可选的最近值缓存）。
#[derive(Clone)]
pub struct StorageSampleWriter {
    sample_store: Arc<dyn SampleStore>,
    realtime_store: Option<Arc<dyn RealtimeStore>>,
}

impl StorageSampleWriter {
    pub fn new(
        sample_store: Arc<dyn SampleStore>,
        realtime_store: Option<Arc<dyn RealtimeStore>>,
    ) -> Self {
        Self {
            sample_store,
            realtime_store,
        }
    }
}

#[async_trait]
impl SampleWriter for StorageSampleWriter {
    async fn write_batch(&self, samples: &[Sample]) -> Result<usize, PipelineError> {
        let written = self
            .sample_store
            .write_samples(samples)
            .await
            .map_err(|err| PipelineError::Writer(err.to_string()))?;
        // 最近值只是缓存，失败不影响批次结果
        if let Some(realtime) = &self.realtime_store {
            if let Err(err) = realtime.upsert_last_values(samples).await {
                tracing::warn!(
                    target: "fleet.ingest",
                    error = %err,
                    samples = samples.len(),
                    "last_value_update_failed"
                );
            }
        }
        Ok(written)
    }
}
