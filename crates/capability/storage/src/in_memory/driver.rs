//! 驱动配置内存实现

use crate::error::StorageError;
use crate::traits::DriverStore;
use domain::{DriverConfig, DriverId};
use std::collections::BTreeMap;
use std::sync::RwLock;

pub struct InMemoryDriverStore {
    drivers: RwLock<BTreeMap<DriverId, DriverConfig>>,
}

impl InMemoryDriverStore {
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, driver: DriverConfig) -> Result<(), StorageError> {
        let mut drivers = self
            .drivers
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        drivers.insert(driver.driver_id, driver);
        Ok(())
    }
}

impl Default for InMemoryDriverStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DriverStore for InMemoryDriverStore {
    async fn list_drivers(&self) -> Result<Vec<DriverConfig>, StorageError> {
        let drivers = self
            .drivers
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(drivers.values().cloned().collect())
    }

    async fn find_driver(
        &self,
        driver_id: DriverId,
    ) -> Result<Option<DriverConfig>, StorageError> {
        let drivers = self
            .drivers
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(drivers.get(&driver_id).cloned())
    }
}
