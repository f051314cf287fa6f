//! 标签内存实现

use crate::error::StorageError;
use crate::traits::TagStore;
use domain::{DeviceId, Tag, TagScope};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryTagStore {
    type_tags: RwLock<HashMap<i64, Vec<Tag>>>,
    device_tags: RwLock<HashMap<DeviceId, Vec<Tag>>>,
}

impl InMemoryTagStore {
    pub fn new() -> Self {
        Self {
            type_tags: RwLock::new(HashMap::new()),
            device_tags: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_type_tag(
        &self,
        device_type_id: i64,
        name: &str,
        definition: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut tags = self
            .type_tags
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        tags.entry(device_type_id).or_default().push(Tag {
            name: name.to_string(),
            definition,
            scope: TagScope::Type,
        });
        Ok(())
    }

    pub fn add_device_tag(
        &self,
        device_id: DeviceId,
        name: &str,
        definition: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut tags = self
            .device_tags
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        tags.entry(device_id).or_default().push(Tag {
            name: name.to_string(),
            definition,
            scope: TagScope::Individual,
        });
        Ok(())
    }
}

impl Default for InMemoryTagStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TagStore for InMemoryTagStore {
    async fn list_type_tags(&self, device_type_id: i64) -> Result<Vec<Tag>, StorageError> {
        let tags = self
            .type_tags
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(tags.get(&device_type_id).cloned().unwrap_or_default())
    }

    async fn list_device_tags(&self, device_id: DeviceId) -> Result<Vec<Tag>, StorageError> {
        let tags = self
            .device_tags
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(tags.get(&device_id).cloned().unwrap_or_default())
    }
}
