//! 存储接口 Trait 定义
//!
//! - DriverStore：驱动配置
//! - DeviceStore：设备、通道、状态与会话分配
//! - TagStore：类型标签与单设备标签
//! - SampleStore：样本批量写入
//! - RealtimeStore：最近有效值
//! - WriteRequestStore：标签写入请求
//!
//! 所有接口返回 StorageError，使用 async_trait 支持动态分发。

use crate::error::StorageError;
use crate::models::{DeviceTagCount, LastValueRecord, SessionAssignment, WriteOutcome};
use async_trait::async_trait;
use domain::{
    Channel, Device, DeviceId, DriverConfig, DriverId, Sample, SessionId, Tag, WriteRequest,
    merge_tags,
};

/// 驱动配置存储接口
#[async_trait]
pub trait DriverStore: Send + Sync {
    async fn list_drivers(&self) -> Result<Vec<DriverConfig>, StorageError>;

    async fn find_driver(&self, driver_id: DriverId)
    -> Result<Option<DriverConfig>, StorageError>;
}

/// 设备存储接口
///
/// 状态码以整数落库，写入前必须是 18 个合法值之一。
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 列出驱动下处于待处理状态（10/20/.../60）的设备。
    async fn list_pending_devices(&self, driver_id: DriverId)
    -> Result<Vec<Device>, StorageError>;

    /// 按状态码集合列出设备（按 id 升序）。
    async fn list_devices_by_status(
        &self,
        driver_id: DriverId,
        codes: &[i32],
    ) -> Result<Vec<Device>, StorageError>;

    async fn find_device(&self, device_id: DeviceId) -> Result<Option<Device>, StorageError>;

    /// 写入设备状态码；设备不存在时报错。
    async fn update_device_status(
        &self,
        device_id: DeviceId,
        code: i32,
    ) -> Result<(), StorageError>;

    /// 覆盖设备 JSON 定义（启用/停用时回写）。
    async fn update_device_definition(
        &self,
        device_id: DeviceId,
        definition: &serde_json::Value,
    ) -> Result<(), StorageError>;

    /// 写入或清除单个设备的会话分配。
    async fn assign_session(
        &self,
        device_id: DeviceId,
        session_id: Option<SessionId>,
    ) -> Result<(), StorageError>;

    /// 批量持久化分配结果。
    async fn save_assignments(
        &self,
        assignments: &[SessionAssignment],
    ) -> Result<usize, StorageError>;

    async fn list_assignments(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<SessionAssignment>, StorageError>;

    async fn find_channel(
        &self,
        driver_id: DriverId,
        name: &str,
    ) -> Result<Option<Channel>, StorageError>;

    async fn list_channels(&self, driver_id: DriverId) -> Result<Vec<Channel>, StorageError>;

    /// 通道下仍存在的设备数：排除 `exclude` 本身以及已删除成功（21）的设备。
    async fn count_channel_devices(
        &self,
        driver_id: DriverId,
        channel_name: &str,
        exclude: DeviceId,
    ) -> Result<usize, StorageError>;
}

/// 标签存储接口
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn list_type_tags(&self, device_type_id: i64) -> Result<Vec<Tag>, StorageError>;

    async fn list_device_tags(&self, device_id: DeviceId) -> Result<Vec<Tag>, StorageError>;

    /// 设备有效标签集合：类型标签 ∪ 单设备标签，同名时单设备标签覆盖。
    async fn effective_tags(&self, device: &Device) -> Result<Vec<Tag>, StorageError> {
        let type_tags = self.list_type_tags(device.device_type_id).await?;
        let individual = self.list_device_tags(device.id).await?;
        Ok(merge_tags(type_tags, individual))
    }

    async fn tag_counts(&self, devices: &[Device]) -> Result<Vec<DeviceTagCount>, StorageError> {
        let mut counts = Vec::with_capacity(devices.len());
        for device in devices {
            let tags = self.effective_tags(device).await?;
            counts.push(DeviceTagCount {
                device_id: device.id,
                tag_count: tags.len(),
            });
        }
        Ok(counts)
    }
}

/// 样本批量写入接口
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// 一次调用写入整批样本，返回写入条数。
    async fn write_samples(&self, samples: &[Sample]) -> Result<usize, StorageError>;
}

/// 最近有效值存储接口
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn upsert_last_values(&self, samples: &[Sample]) -> Result<(), StorageError>;

    async fn get_last_value(
        &self,
        device_id: DeviceId,
        tag_name: &str,
    ) -> Result<Option<LastValueRecord>, StorageError>;
}

/// 标签写入请求存储接口
#[async_trait]
pub trait WriteRequestStore: Send + Sync {
    async fn list_pending_writes(
        &self,
        driver_id: DriverId,
        limit: usize,
    ) -> Result<Vec<WriteRequest>, StorageError>;

    async fn complete_write(&self, id: i64, outcome: &WriteOutcome) -> Result<(), StorageError>;
}
