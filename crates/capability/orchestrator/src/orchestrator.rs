//! 多驱动编排入口。

use crate::error::OrchestratorError;
use crate::factory::GatewayFactory;
use crate::runtime::DriverRuntime;
use crate::status::DriverStatus;
use dashmap::{DashMap, DashSet};
use domain::DriverId;
use fleet_pipeline::PipelineConfig;
use fleet_provision::ProvisionConfig;
use fleet_reconcile::{ReconcileConfig, SyncReport};
use fleet_session::{OverflowPolicy, SessionConfig};
use fleet_storage::{
    DeviceStore, DriverStore, RealtimeStore, SampleStore, TagStore, WriteRequestStore,
};
use std::sync::Arc;
use std::time::Duration;

/// 编排层使用的全部存储接口。
#[derive(Clone)]
pub struct Stores {
    pub drivers: Arc<dyn DriverStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub tags: Arc<dyn TagStore>,
    pub samples: Arc<dyn SampleStore>,
    /// 最近有效值缓存，可选。
    pub realtime: Option<Arc<dyn RealtimeStore>>,
    pub writes: Arc<dyn WriteRequestStore>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_sessions: usize,
    pub overflow_policy: OverflowPolicy,
    pub pipeline: PipelineConfig,
    pub session: SessionConfig,
    pub provision: ProvisionConfig,
    /// 在线状态集合（`live_policy`）同时用于分配。
    pub reconcile: ReconcileConfig,
    pub tag_batch_size: usize,
    pub tag_batch_delay: Duration,
    pub provision_poll_interval: Duration,
    pub write_back_poll_interval: Duration,
    pub write_back_batch: usize,
    pub health_interval: Duration,
    /// `None` 时只在启动时对账。
    pub reconcile_interval: Option<Duration>,
    /// 下发成功后重启会话前的等待时间。
    pub restart_settle: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            overflow_policy: OverflowPolicy::default(),
            pipeline: PipelineConfig::default(),
            session: SessionConfig::default(),
            provision: ProvisionConfig::default(),
            reconcile: ReconcileConfig::default(),
            tag_batch_size: 50,
            tag_batch_delay: Duration::from_millis(100),
            provision_poll_interval: Duration::from_secs(5),
            write_back_poll_interval: Duration::from_secs(1),
            write_back_batch: 100,
            health_interval: Duration::from_secs(30),
            reconcile_interval: None,
            restart_settle: Duration::from_secs(2),
        }
    }
}

pub struct Orchestrator {
    stores: Stores,
    factory: Arc<dyn GatewayFactory>,
    config: OrchestratorConfig,
    drivers: DashMap<DriverId, Arc<DriverRuntime>>,
    /// 启动中的驱动，启动结束（成功或失败）时移除。
    starting: DashSet<DriverId>,
}

/// 启动占位，drop 时释放。
struct StartSlot<'a> {
    starting: &'a DashSet<DriverId>,
    driver_id: DriverId,
}

impl Drop for StartSlot<'_> {
    fn drop(&mut self) {
        self.starting.remove(&self.driver_id);
    }
}

impl Orchestrator {
    pub fn new(
        stores: Stores,
        factory: Arc<dyn GatewayFactory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            stores,
            factory,
            config,
            drivers: DashMap::new(),
            starting: DashSet::new(),
        }
    }

    /// 启动驱动。启动失败直接返回，不自动重试。
    /// 同一驱动正在启动或已运行时立即返回 `AlreadyRunning`。
    pub async fn start(&self, driver_id: DriverId) -> Result<(), OrchestratorError> {
        let _slot = self.reserve(driver_id)?;
        tracing::info!(target: "fleet.orchestrator", driver_id, "driver_starting");
        let runtime =
            match DriverRuntime::start(driver_id, &self.stores, self.factory.as_ref(), &self.config)
                .await
            {
                Ok(runtime) => Arc::new(runtime),
                Err(err) => {
                    tracing::error!(
                        target: "fleet.orchestrator",
                        driver_id,
                        error = %err,
                        "driver_start_failed"
                    );
                    return Err(err);
                }
            };
        // 先登记运行时再释放占位
        self.drivers.insert(driver_id, runtime);
        Ok(())
    }

    fn reserve(&self, driver_id: DriverId) -> Result<StartSlot<'_>, OrchestratorError> {
        if !self.starting.insert(driver_id) {
            return Err(OrchestratorError::AlreadyRunning(driver_id));
        }
        let slot = StartSlot {
            starting: &self.starting,
            driver_id,
        };
        if self.drivers.contains_key(&driver_id) {
            return Err(OrchestratorError::AlreadyRunning(driver_id));
        }
        Ok(slot)
    }

    pub async fn stop(&self, driver_id: DriverId) -> Result<(), OrchestratorError> {
        let (_, runtime) = self
            .drivers
            .remove(&driver_id)
            .ok_or(OrchestratorError::NotRunning(driver_id))?;
        runtime.shutdown().await
    }

    pub async fn stop_all(&self) {
        for driver_id in self.running_drivers() {
            if let Err(err) = self.stop(driver_id).await {
                tracing::warn!(
                    target: "fleet.orchestrator",
                    driver_id,
                    error = %err,
                    "driver_stop_failed"
                );
            }
        }
    }

    pub fn is_running(&self, driver_id: DriverId) -> bool {
        self.drivers.contains_key(&driver_id)
    }

    /// 运行中的驱动（按 ID 升序）。
    pub fn running_drivers(&self) -> Vec<DriverId> {
        let mut ids: Vec<DriverId> = self.drivers.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// 对运行中的驱动立即执行一次对账。
    pub async fn sync_now(&self, driver_id: DriverId) -> Result<SyncReport, OrchestratorError> {
        let runtime = self
            .drivers
            .get(&driver_id)
            .map(|entry| entry.value().clone())
            .ok_or(OrchestratorError::NotRunning(driver_id))?;
        runtime.sync_now().await
    }

    pub fn status(&self) -> Vec<DriverStatus> {
        let mut statuses: Vec<DriverStatus> = self
            .drivers
            .iter()
            .map(|entry| entry.value().status())
            .collect();
        statuses.sort_by_key(|status| status.driver_id);
        statuses
    }

    pub fn driver_status(&self, driver_id: DriverId) -> Option<DriverStatus> {
        self.drivers
            .get(&driver_id)
            .map(|entry| entry.value().status())
    }
}
