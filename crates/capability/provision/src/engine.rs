//! 设备下发状态机
//!
//! `process_device_operation` 根据待处理状态码分派到网关配置调用：
//!
//! | 状态 | 步骤 |
//! |------|------|
//! | Add(10) | 通道 -> 设备 -> 标签 -> 按会话上限与溢出策略分配会话 |
//! | Delete(20) | 取消订阅 -> 等待 -> 删标签/设备 -> 通道为空时删通道 -> 清除分配 |
//! | Update(30) | 就地更新通道 -> 删除并重建设备与标签 |
//! | Activate(40) / Deactivate(50) | 修改数据采集开关并回写定义 |
//! | TagUpdate(60) | 删除并重建设备与标签 |
//!
//! 任一步失败即写入 `P+2`；全部成功写入 `P+1`。Add/Update/TagUpdate 成功后通知编排层重启会话。

use crate::error::ProvisionError;
use crate::lock::OperationLocks;
use crate::primitives::Provisioner;
use domain::{
    Device, DeviceId, DeviceStatus, DriverId, OperationKind, SessionId, failed_code, success_code,
};
use fleet_gateway::DATA_COLLECTION_PROPERTY;
use fleet_session::SessionPool;
use fleet_storage::DeviceStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// 下发参数。
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// 删除设备前等待取消订阅生效的时间。
    pub unsubscribe_settle: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            unsubscribe_settle: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 该设备已有进行中的操作。
    AlreadyRunning,
    NotPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Succeeded { status: i32 },
    Failed { status: i32, error: String },
    Skipped(SkipReason),
}

/// 会话重启请求（由编排层在等待一段时间后执行）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartRequest {
    pub driver_id: DriverId,
    pub device_id: DeviceId,
    pub session_id: SessionId,
    pub kind: OperationKind,
}

/// 下发状态机。
pub struct ProvisioningEngine {
    provisioner: Arc<Provisioner>,
    sessions: Arc<SessionPool>,
    locks: OperationLocks,
    restarts: Option<mpsc::UnboundedSender<RestartRequest>>,
    config: ProvisionConfig,
}

impl ProvisioningEngine {
    pub fn new(
        provisioner: Arc<Provisioner>,
        sessions: Arc<SessionPool>,
        locks: OperationLocks,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            provisioner,
            sessions,
            locks,
            restarts: None,
            config,
        }
    }

    /// 设置会话重启通知通道。
    pub fn with_restart_sender(mut self, restarts: mpsc::UnboundedSender<RestartRequest>) -> Self {
        self.restarts = Some(restarts);
        self
    }

    pub fn locks(&self) -> &OperationLocks {
        &self.locks
    }

    fn devices(&self) -> &Arc<dyn DeviceStore> {
        self.provisioner.devices()
    }

    /// 列出驱动下待处理的设备。
    pub async fn pending_devices(&self, driver_id: DriverId) -> Result<Vec<Device>, ProvisionError> {
        Ok(self.devices().list_pending_devices(driver_id).await?)
    }

    /// 处理一次设备操作。设备已被锁定时立即返回，不排队。
    pub async fn process_device_operation(
        &self,
        device_id: DeviceId,
        status_code: i32,
        driver_id: DriverId,
    ) -> ProcessOutcome {
        let Some(status) = DeviceStatus::from_code(status_code).filter(|s| s.is_pending()) else {
            fleet_telemetry::record_provision_skipped();
            return ProcessOutcome::Skipped(SkipReason::NotPending);
        };
        let Some(guard) = self.locks.try_acquire(device_id) else {
            fleet_telemetry::record_provision_skipped();
            tracing::debug!(
                target: "fleet.provision",
                driver_id,
                device_id,
                status = status_code,
                "operation_already_running"
            );
            return ProcessOutcome::Skipped(SkipReason::AlreadyRunning);
        };

        let started = Instant::now();
        tracing::info!(
            target: "fleet.provision",
            driver_id,
            device_id,
            operation = status.kind.as_str(),
            "operation_started"
        );
        let result = self.dispatch(device_id, driver_id, status.kind).await;

        match result {
            Ok(restart) => {
                let code = success_code(status_code).unwrap_or(status_code + 1);
                if let Err(err) = self.devices().update_device_status(device_id, code).await {
                    tracing::error!(
                        target: "fleet.provision",
                        device_id,
                        status = code,
                        error = %err,
                        "status_write_failed"
                    );
                }
                fleet_telemetry::record_provision_success();
                tracing::info!(
                    target: "fleet.provision",
                    driver_id,
                    device_id,
                    operation = status.kind.as_str(),
                    status = code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "operation_succeeded"
                );
                drop(guard);
                if let Some(session_id) = restart {
                    self.request_restart(RestartRequest {
                        driver_id,
                        device_id,
                        session_id,
                        kind: status.kind,
                    });
                }
                ProcessOutcome::Succeeded { status: code }
            }
            Err(err) => {
                let code = failed_code(status_code).unwrap_or(status_code + 2);
                if let Err(write_err) = self.devices().update_device_status(device_id, code).await {
                    tracing::error!(
                        target: "fleet.provision",
                        device_id,
                        status = code,
                        error = %write_err,
                        "status_write_failed"
                    );
                }
                fleet_telemetry::record_provision_failure();
                tracing::warn!(
                    target: "fleet.provision",
                    driver_id,
                    device_id,
                    operation = status.kind.as_str(),
                    status = code,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "operation_failed"
                );
                drop(guard);
                ProcessOutcome::Failed {
                    status: code,
                    error: err.to_string(),
                }
            }
        }
    }

    /// 返回需要重启的会话。
    async fn dispatch(
        &self,
        device_id: DeviceId,
        driver_id: DriverId,
        kind: OperationKind,
    ) -> Result<Option<SessionId>, ProvisionError> {
        let device = self
            .devices()
            .find_device(device_id)
            .await?
            .ok_or(ProvisionError::DeviceNotFound(device_id))?;
        if device.driver_id != driver_id {
            return Err(ProvisionError::DriverMismatch {
                device_id,
                expected: driver_id,
                actual: device.driver_id,
            });
        }
        match kind {
            OperationKind::Add => self.add(&device).await,
            OperationKind::Delete => self.delete(&device).await.map(|()| None),
            OperationKind::Update => self.update(&device).await,
            OperationKind::Activate => self.set_data_collection(&device, true).await.map(|()| None),
            OperationKind::Deactivate => {
                self.set_data_collection(&device, false).await.map(|()| None)
            }
            OperationKind::TagUpdate => self.recreate(&device).await,
        }
    }

    async fn add(&self, device: &Device) -> Result<Option<SessionId>, ProvisionError> {
        self.provisioner
            .ensure_channel(device.driver_id, &device.channel_name)
            .await?;
        let tags = self.provisioner.ensure_device_with_tags(device).await?;
        self.place(device, tags.len()).await
    }

    async fn delete(&self, device: &Device) -> Result<(), ProvisionError> {
        let removed = self.sessions.unsubscribe_device(device.id).await?;
        if !self.config.unsubscribe_settle.is_zero() {
            tokio::time::sleep(self.config.unsubscribe_settle).await;
        }
        self.provisioner.delete_device_with_tags(device).await?;
        self.provisioner.delete_channel_if_empty(device).await?;
        self.devices().assign_session(device.id, None).await?;
        self.sessions.release(device.id);
        tracing::debug!(
            target: "fleet.provision",
            device_id = device.id,
            unsubscribed = removed,
            "device_removed"
        );
        Ok(())
    }

    async fn update(&self, device: &Device) -> Result<Option<SessionId>, ProvisionError> {
        self.provisioner
            .ensure_channel(device.driver_id, &device.channel_name)
            .await?;
        self.recreate(device).await
    }

    async fn recreate(&self, device: &Device) -> Result<Option<SessionId>, ProvisionError> {
        self.provisioner.delete_device_with_tags(device).await?;
        let tags = self.provisioner.ensure_device_with_tags(device).await?;
        match device
            .session_id
            .or_else(|| self.sessions.session_of(device.id))
        {
            Some(session_id) => {
                self.assign(device, session_id, tags.len()).await?;
                Ok(Some(session_id))
            }
            None => self.place(device, tags.len()).await,
        }
    }

    /// 按会话上限与溢出策略选择会话；不分配时清除已有分配且不重启会话。
    async fn place(
        &self,
        device: &Device,
        tag_count: usize,
    ) -> Result<Option<SessionId>, ProvisionError> {
        let placement = self.sessions.place(device.id, tag_count);
        match placement.session_id() {
            Some(session_id) => {
                self.assign(device, session_id, tag_count).await?;
                Ok(Some(session_id))
            }
            None => {
                self.devices().assign_session(device.id, None).await?;
                self.sessions.release(device.id);
                tracing::warn!(
                    target: "fleet.provision",
                    device_id = device.id,
                    tag_count,
                    "device_left_unassigned"
                );
                Ok(None)
            }
        }
    }

    async fn assign(
        &self,
        device: &Device,
        session_id: SessionId,
        tag_count: usize,
    ) -> Result<(), ProvisionError> {
        self.devices()
            .assign_session(device.id, Some(session_id))
            .await?;
        self.sessions.assign(device.id, session_id, tag_count);
        Ok(())
    }

    async fn set_data_collection(&self, device: &Device, enabled: bool) -> Result<(), ProvisionError> {
        let mut definition = device.definition.clone();
        let Some(fields) = definition.as_object_mut() else {
            return Err(ProvisionError::InvalidDefinition(format!(
                "device {} definition is not an object",
                device.id
            )));
        };
        fields.insert(DATA_COLLECTION_PROPERTY.to_string(), Value::Bool(enabled));
        self.provisioner
            .push_device_definition(device, &definition)
            .await?;
        self.devices()
            .update_device_definition(device.id, &definition)
            .await?;
        Ok(())
    }

    fn request_restart(&self, request: RestartRequest) {
        let Some(restarts) = &self.restarts else {
            return;
        };
        if restarts.send(request).is_err() {
            tracing::warn!(
                target: "fleet.provision",
                device_id = request.device_id,
                session_id = request.session_id,
                "restart_listener_closed"
            );
        }
    }
}
