//! 网关配置原语
//!
//! 下发状态机与对账共用：确保通道存在、确保设备及其标签存在、删除设备及其标签。
//! 标签按批并发调用，批与批之间等待 `batch_delay`。

use crate::error::ProvisionError;
use domain::{Device, DriverId, Tag};
use fleet_gateway::{ApplyOutcome, GatewayConfigApi, NAME_PROPERTY};
use fleet_storage::{DeviceStore, TagStore};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// 确保 JSON 定义带有对象名；缺失时补上 `name`。
pub fn named_definition(definition: &Value, name: &str) -> Result<Value, ProvisionError> {
    match definition {
        Value::Object(map) => {
            let mut map = map.clone();
            map.entry(NAME_PROPERTY)
                .or_insert_with(|| Value::String(name.to_string()));
            Ok(Value::Object(map))
        }
        Value::Null => {
            let mut map = serde_json::Map::new();
            map.insert(NAME_PROPERTY.to_string(), Value::String(name.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(ProvisionError::InvalidDefinition(format!(
            "{name}: expected object, got {other}"
        ))),
    }
}

pub struct Provisioner {
    devices: Arc<dyn DeviceStore>,
    tags: Arc<dyn TagStore>,
    gateway: Arc<dyn GatewayConfigApi>,
    tag_batch_size: usize,
    batch_delay: Duration,
}

impl Provisioner {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        tags: Arc<dyn TagStore>,
        gateway: Arc<dyn GatewayConfigApi>,
        tag_batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            devices,
            tags,
            gateway,
            tag_batch_size: tag_batch_size.max(1),
            batch_delay,
        }
    }

    pub fn devices(&self) -> &Arc<dyn DeviceStore> {
        &self.devices
    }

    pub fn tags(&self) -> &Arc<dyn TagStore> {
        &self.tags
    }

    pub fn gateway(&self) -> &Arc<dyn GatewayConfigApi> {
        &self.gateway
    }

    /// 用存储中的通道模板创建通道；已存在时就地更新。
    pub async fn ensure_channel(
        &self,
        driver_id: DriverId,
        channel_name: &str,
    ) -> Result<ApplyOutcome, ProvisionError> {
        let channel = self
            .devices
            .find_channel(driver_id, channel_name)
            .await?
            .ok_or_else(|| ProvisionError::ChannelNotFound(channel_name.to_string()))?;
        let definition = named_definition(&channel.definition, &channel.name)?;
        let outcome = self.gateway.create_or_update_channel(&definition).await?;
        tracing::debug!(
            target: "fleet.provision",
            driver_id,
            channel = channel_name,
            outcome = ?outcome,
            "channel_ensured"
        );
        Ok(outcome)
    }

    /// 创建或更新设备本身（不含标签）。
    pub async fn ensure_device(&self, device: &Device) -> Result<ApplyOutcome, ProvisionError> {
        self.push_device_definition(device, &device.definition).await
    }

    pub async fn push_device_definition(
        &self,
        device: &Device,
        definition: &Value,
    ) -> Result<ApplyOutcome, ProvisionError> {
        let definition = named_definition(definition, &device.name)?;
        Ok(self
            .gateway
            .create_or_update_device(&device.channel_name, &definition)
            .await?)
    }

    /// 创建设备及其有效标签，返回创建的标签集合。
    pub async fn ensure_device_with_tags(&self, device: &Device) -> Result<Vec<Tag>, ProvisionError> {
        self.ensure_device(device).await?;
        let tags = self.tags.effective_tags(device).await?;
        self.ensure_tags(device, &tags).await?;
        tracing::debug!(
            target: "fleet.provision",
            device_id = device.id,
            path = %device.path(),
            tags = tags.len(),
            "device_ensured"
        );
        Ok(tags)
    }

    /// 分批创建标签；首个失败即返回。
    pub async fn ensure_tags(&self, device: &Device, tags: &[Tag]) -> Result<usize, ProvisionError> {
        let mut applied = 0;
        for (index, batch) in tags.chunks(self.tag_batch_size).enumerate() {
            if index > 0 {
                self.pause().await;
            }
            let calls = batch.iter().map(|tag| async move {
                let definition = named_definition(&tag.definition, &tag.name)?;
                self.gateway
                    .create_or_update_tag(&device.channel_name, &device.name, &definition)
                    .await
                    .map_err(ProvisionError::from)
            });
            for result in join_all(calls).await {
                result?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// 分批删除标签后删除设备；对象不存在视为成功。
    pub async fn delete_device_with_tags(&self, device: &Device) -> Result<(), ProvisionError> {
        let tags = self.tags.effective_tags(device).await?;
        for (index, batch) in tags.chunks(self.tag_batch_size).enumerate() {
            if index > 0 {
                self.pause().await;
            }
            let calls = batch.iter().map(|tag| {
                self.gateway
                    .delete_tag(&device.channel_name, &device.name, &tag.name)
            });
            for result in join_all(calls).await {
                result?;
            }
        }
        self.gateway
            .delete_device(&device.channel_name, &device.name)
            .await?;
        tracing::debug!(
            target: "fleet.provision",
            device_id = device.id,
            path = %device.path(),
            tags = tags.len(),
            "device_deleted"
        );
        Ok(())
    }

    /// 通道下已没有其他设备时删除通道，返回是否删除。
    pub async fn delete_channel_if_empty(&self, device: &Device) -> Result<bool, ProvisionError> {
        let remaining = self
            .devices
            .count_channel_devices(device.driver_id, &device.channel_name, device.id)
            .await?;
        if remaining > 0 {
            return Ok(false);
        }
        self.gateway.delete_channel(&device.channel_name).await?;
        tracing::info!(
            target: "fleet.provision",
            driver_id = device.driver_id,
            channel = %device.channel_name,
            "channel_deleted"
        );
        Ok(true)
    }

    async fn pause(&self) {
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }
    }
}
