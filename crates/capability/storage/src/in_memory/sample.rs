//! 样本写入内存实现

use crate::error::StorageError;
use crate::traits::SampleStore;
use domain::Sample;
use std::sync::RwLock;

pub struct InMemorySampleStore {
    samples: RwLock<Vec<Sample>>,
    batches: RwLock<Vec<usize>>,
}

impl InMemorySampleStore {
    pub fn new() -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
            batches: RwLock::new(Vec::new()),
        }
    }

    /// 已写入样本数（用于测试）
    pub fn len(&self) -> usize {
        self.samples.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 每次批量写入的条数（用于测试）
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.read().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.read().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for InMemorySampleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SampleStore for InMemorySampleStore {
    async fn write_samples(&self, samples: &[Sample]) -> Result<usize, StorageError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut store = self
            .samples
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        store.extend(samples.iter().cloned());
        let mut batches = self
            .batches
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        batches.push(samples.len());
        Ok(samples.len())
    }
}
