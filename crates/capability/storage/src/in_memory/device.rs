//! 设备与通道内存实现

use crate::error::StorageError;
use crate::models::SessionAssignment;
use crate::traits::DeviceStore;
use crate::validation::ensure_status_code;
use domain::{
    Channel, Device, DeviceId, DeviceStatus, DriverId, OperationKind, Phase, SessionId,
    is_pending_status,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

pub struct InMemoryDeviceStore {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    channels: RwLock<HashMap<(DriverId, String), Channel>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// 插入或替换设备（模拟外部写入待处理行）。
    pub fn upsert_device(&self, device: Device) -> Result<(), StorageError> {
        ensure_status_code(device.status)?;
        let mut devices = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        devices.insert(device.id, device);
        Ok(())
    }

    pub fn upsert_channel(&self, channel: Channel) -> Result<(), StorageError> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        channels.insert((channel.driver_id, channel.name.clone()), channel);
        Ok(())
    }

    /// 当前状态码（用于测试断言）。
    pub fn status_of(&self, device_id: DeviceId) -> Option<i32> {
        self.devices
            .read()
            .ok()
            .and_then(|devices| devices.get(&device_id).map(|device| device.status))
    }

    fn with_device<T>(
        &self,
        device_id: DeviceId,
        apply: impl FnOnce(&mut Device) -> T,
    ) -> Result<T, StorageError> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let device = devices
            .get_mut(&device_id)
            .ok_or_else(|| StorageError::new(format!("device {device_id} not found")))?;
        Ok(apply(device))
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

const DELETED: DeviceStatus = DeviceStatus::new(OperationKind::Delete, Phase::Success);

#[async_trait::async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn list_pending_devices(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<Device>, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(devices
            .values()
            .filter(|device| device.driver_id == driver_id && is_pending_status(device.status))
            .cloned()
            .collect())
    }

    async fn list_devices_by_status(
        &self,
        driver_id: DriverId,
        codes: &[i32],
    ) -> Result<Vec<Device>, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(devices
            .values()
            .filter(|device| device.driver_id == driver_id && codes.contains(&device.status))
            .cloned()
            .collect())
    }

    async fn find_device(&self, device_id: DeviceId) -> Result<Option<Device>, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(devices.get(&device_id).cloned())
    }

    async fn update_device_status(
        &self,
        device_id: DeviceId,
        code: i32,
    ) -> Result<(), StorageError> {
        let status = ensure_status_code(code)?;
        self.with_device(device_id, |device| device.status = status.code())
    }

    async fn update_device_definition(
        &self,
        device_id: DeviceId,
        definition: &serde_json::Value,
    ) -> Result<(), StorageError> {
        self.with_device(device_id, |device| device.definition = definition.clone())
    }

    async fn assign_session(
        &self,
        device_id: DeviceId,
        session_id: Option<SessionId>,
    ) -> Result<(), StorageError> {
        self.with_device(device_id, |device| device.session_id = session_id)
    }

    async fn save_assignments(
        &self,
        assignments: &[SessionAssignment],
    ) -> Result<usize, StorageError> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut updated = 0;
        for assignment in assignments {
            if let Some(device) = devices.get_mut(&assignment.device_id) {
                device.session_id = Some(assignment.session_id);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_assignments(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<SessionAssignment>, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(devices
            .values()
            .filter(|device| device.driver_id == driver_id)
            .filter_map(|device| {
                device.session_id.map(|session_id| SessionAssignment {
                    device_id: device.id,
                    session_id,
                })
            })
            .collect())
    }

    async fn find_channel(
        &self,
        driver_id: DriverId,
        name: &str,
    ) -> Result<Option<Channel>, StorageError> {
        let channels = self
            .channels
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(channels.get(&(driver_id, name.to_string())).cloned())
    }

    async fn list_channels(&self, driver_id: DriverId) -> Result<Vec<Channel>, StorageError> {
        let channels = self
            .channels
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<Channel> = channels
            .values()
            .filter(|channel| channel.driver_id == driver_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn count_channel_devices(
        &self,
        driver_id: DriverId,
        channel_name: &str,
        exclude: DeviceId,
    ) -> Result<usize, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(devices
            .values()
            .filter(|device| {
                device.driver_id == driver_id
                    && device.channel_name == channel_name
                    && device.id != exclude
                    && device.status != DELETED.code()
            })
            .count())
    }
}
