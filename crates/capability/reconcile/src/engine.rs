//! 对账执行：浏览 -> 差异 -> 分批补齐 -> 复查
//!
//! 只补缺失的通道与设备，多余对象只报告不删除。

use crate::error::ReconcileError;
use crate::snapshot::{ActualSnapshot, DesiredSnapshot, diff, is_reserved};
use domain::{Device, DriverId, LiveStatusPolicy};
use fleet_gateway::{ProtocolConnector, ProtocolSession};
use fleet_provision::Provisioner;
use fleet_storage::{DeviceStore, DriverStore};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub channel_batch_size: usize,
    pub device_batch_size: usize,
    pub batch_delay: Duration,
    pub live_policy: LiveStatusPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            channel_batch_size: 10,
            device_batch_size: 5,
            batch_delay: Duration::from_millis(200),
            live_policy: LiveStatusPolicy::default(),
        }
    }
}

/// 一次对账的结果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub driver_id: DriverId,
    pub desired_channels: usize,
    pub desired_devices: usize,
    pub missing_channels: Vec<String>,
    pub missing_devices: Vec<String>,
    /// 期望且已存在的设备数。
    pub already_present: usize,
    pub extra_channels: Vec<String>,
    pub extra_devices: Vec<String>,
    pub channels_added: usize,
    pub devices_added: usize,
    pub tags_added: usize,
    /// 补齐调用失败的对象路径。
    pub failed: Vec<String>,
    /// 复查后仍缺失的对象路径。
    pub still_missing: Vec<String>,
    pub browse_ms: u64,
    pub repair_ms: u64,
    pub verify_ms: u64,
    pub total_ms: u64,
}

impl SyncReport {
    pub fn is_converged(&self) -> bool {
        self.still_missing.is_empty()
    }
}

pub struct Reconciler {
    drivers: Arc<dyn DriverStore>,
    connector: Arc<dyn ProtocolConnector>,
    provisioner: Arc<Provisioner>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        drivers: Arc<dyn DriverStore>,
        connector: Arc<dyn ProtocolConnector>,
        provisioner: Arc<Provisioner>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            drivers,
            connector,
            provisioner,
            config,
        }
    }

    /// 建立一条浏览连接并对账。连接失败返回 [`ReconcileError::Connect`]。
    pub async fn sync(&self, driver_id: DriverId) -> Result<SyncReport, ReconcileError> {
        let driver = self
            .drivers
            .find_driver(driver_id)
            .await?
            .ok_or(ReconcileError::DriverNotFound(driver_id))?;
        let session = self
            .connector
            .connect(&driver)
            .await
            .map_err(ReconcileError::Connect)?;
        let result = self.sync_with(driver_id, session.as_ref()).await;
        session.close().await;
        result
    }

    /// 使用已有连接对账。
    pub async fn sync_with(
        &self,
        driver_id: DriverId,
        session: &dyn ProtocolSession,
    ) -> Result<SyncReport, ReconcileError> {
        let started = Instant::now();
        let live = self
            .provisioner
            .devices()
            .list_devices_by_status(driver_id, &self.config.live_policy.live_codes())
            .await?;
        let desired = DesiredSnapshot::from_devices(live);
        let actual = browse(session).await?;
        let browse_ms = started.elapsed().as_millis() as u64;

        let drift = diff(&desired, &actual);
        let mut report = SyncReport {
            driver_id,
            desired_channels: desired.channels.len(),
            desired_devices: desired.device_count(),
            already_present: desired.device_count() - drift.missing_devices.len(),
            missing_channels: drift.missing_channels.clone(),
            missing_devices: drift.missing_devices.clone(),
            extra_channels: drift.extra_channels,
            extra_devices: drift.extra_devices,
            browse_ms,
            ..SyncReport::default()
        };
        tracing::info!(
            target: "fleet.reconcile",
            driver_id,
            desired_devices = report.desired_devices,
            missing_channels = report.missing_channels.len(),
            missing_devices = report.missing_devices.len(),
            extra_devices = report.extra_devices.len(),
            "drift_detected"
        );

        let repair_started = Instant::now();
        self.add_channels(driver_id, &drift.missing_channels, &mut report)
            .await;
        let missing: BTreeSet<&str> = drift.missing_devices.iter().map(String::as_str).collect();
        let devices: Vec<&Device> = desired
            .devices()
            .filter(|device| missing.contains(device.path().as_str()))
            .collect();
        self.add_devices(&devices, &mut report).await;
        report.repair_ms = repair_started.elapsed().as_millis() as u64;

        let verify_started = Instant::now();
        let verified = browse(session).await?;
        let remaining = diff(&desired, &verified);
        report.still_missing = remaining
            .missing_channels
            .into_iter()
            .chain(remaining.missing_devices)
            .collect();
        report.verify_ms = verify_started.elapsed().as_millis() as u64;
        report.total_ms = started.elapsed().as_millis() as u64;

        fleet_telemetry::record_reconcile_run(
            (report.channels_added + report.devices_added) as u64,
            report.still_missing.len() as u64,
        );
        tracing::info!(
            target: "fleet.reconcile",
            driver_id,
            channels_added = report.channels_added,
            devices_added = report.devices_added,
            tags_added = report.tags_added,
            already_present = report.already_present,
            failed = report.failed.len(),
            still_missing = report.still_missing.len(),
            total_ms = report.total_ms,
            "reconcile_finished"
        );
        Ok(report)
    }

    async fn add_channels(&self, driver_id: DriverId, channels: &[String], report: &mut SyncReport) {
        for (index, batch) in channels
            .chunks(self.config.channel_batch_size.max(1))
            .enumerate()
        {
            if index > 0 {
                self.pause().await;
            }
            let calls = batch
                .iter()
                .map(|channel| self.provisioner.ensure_channel(driver_id, channel));
            for (channel, result) in batch.iter().zip(join_all(calls).await) {
                match result {
                    Ok(_) => report.channels_added += 1,
                    Err(err) => {
                        tracing::warn!(
                            target: "fleet.reconcile",
                            driver_id,
                            channel = %channel,
                            error = %err,
                            "channel_add_failed"
                        );
                        report.failed.push(channel.clone());
                    }
                }
            }
        }
    }

    async fn add_devices(&self, devices: &[&Device], report: &mut SyncReport) {
        for (index, batch) in devices
            .chunks(self.config.device_batch_size.max(1))
            .enumerate()
        {
            if index > 0 {
                self.pause().await;
            }
            let calls = batch
                .iter()
                .map(|device| self.provisioner.ensure_device_with_tags(device));
            for (device, result) in batch.iter().zip(join_all(calls).await) {
                match result {
                    Ok(tags) => {
                        report.devices_added += 1;
                        report.tags_added += tags.len();
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "fleet.reconcile",
                            device_id = device.id,
                            path = %device.path(),
                            error = %err,
                            "device_add_failed"
                        );
                        report.failed.push(device.path());
                    }
                }
            }
        }
    }

    async fn pause(&self) {
        if !self.config.batch_delay.is_zero() {
            tokio::time::sleep(self.config.batch_delay).await;
        }
    }
}

/// 两层浏览：通道，再到各通道下的设备。保留对象被过滤。
async fn browse(session: &dyn ProtocolSession) -> Result<ActualSnapshot, ReconcileError> {
    let mut actual = ActualSnapshot::default();
    let channels = session.browse(None).await.map_err(ReconcileError::Browse)?;
    for channel in channels {
        if is_reserved(&channel.name) {
            continue;
        }
        actual.insert_channel(&channel.name);
        let devices = session
            .browse(Some(&channel.name))
            .await
            .map_err(ReconcileError::Browse)?;
        for device in devices {
            actual.insert_device(&channel.name, &device.name);
        }
    }
    Ok(actual)
}
