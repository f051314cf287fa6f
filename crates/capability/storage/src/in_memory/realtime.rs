//! 最近有效值内存实现

use crate::error::StorageError;
use crate::models::LastValueRecord;
use crate::traits::RealtimeStore;
use domain::{DeviceId, Sample};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryRealtimeStore {
    last_values: RwLock<HashMap<(DeviceId, String), LastValueRecord>>,
}

impl InMemoryRealtimeStore {
    pub fn new() -> Self {
        Self {
            last_values: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.last_values.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRealtimeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RealtimeStore for InMemoryRealtimeStore {
    async fn upsert_last_values(&self, samples: &[Sample]) -> Result<(), StorageError> {
        let mut values = self
            .last_values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        for sample in samples {
            let key = (sample.device_id, sample.tag_name.clone());
            // 乱序到达时保留时间戳较新的值
            if values
                .get(&key)
                .is_some_and(|current| current.ts_ms > sample.ts_ms)
            {
                continue;
            }
            values.insert(
                key,
                LastValueRecord {
                    device_id: sample.device_id,
                    tag_name: sample.tag_name.clone(),
                    value: sample.value,
                    ts_ms: sample.ts_ms,
                },
            );
        }
        Ok(())
    }

    async fn get_last_value(
        &self,
        device_id: DeviceId,
        tag_name: &str,
    ) -> Result<Option<LastValueRecord>, StorageError> {
        let values = self
            .last_values
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(values.get(&(device_id, tag_name.to_string())).cloned())
    }
}
