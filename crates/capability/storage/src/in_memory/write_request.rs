//! 写入请求内存实现

use crate::error::StorageError;
use crate::models::WriteOutcome;
use crate::traits::WriteRequestStore;
use domain::{DriverId, WriteRequest};
use std::collections::BTreeMap;
use std::sync::RwLock;

struct Entry {
    request: WriteRequest,
    outcome: Option<WriteOutcome>,
}

pub struct InMemoryWriteRequestStore {
    entries: RwLock<BTreeMap<i64, Entry>>,
}

impl InMemoryWriteRequestStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, request: WriteRequest) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        entries.insert(
            request.id,
            Entry {
                request,
                outcome: None,
            },
        );
        Ok(())
    }

    /// 请求的执行结果（用于测试）
    pub fn outcome(&self, id: i64) -> Option<WriteOutcome> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&id).and_then(|entry| entry.outcome.clone()))
    }
}

impl Default for InMemoryWriteRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WriteRequestStore for InMemoryWriteRequestStore {
    async fn list_pending_writes(
        &self,
        driver_id: DriverId,
        limit: usize,
    ) -> Result<Vec<WriteRequest>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(entries
            .values()
            .filter(|entry| entry.outcome.is_none() && entry.request.driver_id == driver_id)
            .take(limit)
            .map(|entry| entry.request.clone())
            .collect())
    }

    async fn complete_write(&self, id: i64, outcome: &WriteOutcome) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| StorageError::new(format!("write request {id} not found")))?;
        entry.outcome = Some(outcome.clone());
        Ok(())
    }
}
