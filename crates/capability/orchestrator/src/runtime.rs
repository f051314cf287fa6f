//! 单个驱动的运行时：启动顺序与停止顺序。

use crate::error::OrchestratorError;
use crate::factory::GatewayFactory;
use crate::loops::{self, RestartContext, WriteBackContext};
use crate::orchestrator::{OrchestratorConfig, Stores};
use crate::status::DriverStatus;
use domain::{DeviceId, DriverConfig, DriverId};
use fleet_pipeline::{Pipeline, StorageSampleWriter};
use fleet_provision::{OperationLocks, Provisioner, ProvisioningEngine, spawn_provisioning_loop};
use fleet_reconcile::{Reconciler, SyncReport};
use fleet_session::{DeviceLoad, DistributionPlan, SessionPool, plan};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct DriverRuntime {
    driver: Arc<DriverConfig>,
    pool: Arc<SessionPool>,
    pipeline: Arc<Pipeline>,
    engine: Arc<ProvisioningEngine>,
    reconciler: Arc<Reconciler>,
    plan: DistributionPlan,
    last_sync: Arc<Mutex<Option<SyncReport>>>,
    dispatch_cancel: CancellationToken,
    background_cancel: CancellationToken,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl DriverRuntime {
    /// 启动顺序：加载驱动 -> 对账 -> 分配 -> 流水线 -> 会话 -> 下发循环与后台循环。
    ///
    /// 对账阶段的连接失败视为致命错误，直接返回。
    pub(crate) async fn start(
        driver_id: DriverId,
        stores: &Stores,
        factory: &dyn GatewayFactory,
        config: &OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        let driver = stores
            .drivers
            .find_driver(driver_id)
            .await?
            .ok_or(OrchestratorError::DriverNotFound(driver_id))?;
        if !driver.enabled {
            return Err(OrchestratorError::DriverDisabled(driver_id));
        }
        let driver = Arc::new(driver);
        let config_api = factory.config_api(&driver)?;
        let connector = factory.connector(&driver)?;

        let provisioner = Arc::new(Provisioner::new(
            stores.devices.clone(),
            stores.tags.clone(),
            config_api,
            config.tag_batch_size,
            config.tag_batch_delay,
        ));
        let reconciler = Arc::new(Reconciler::new(
            stores.drivers.clone(),
            connector.clone(),
            provisioner.clone(),
            config.reconcile.clone(),
        ));
        let report = reconciler.sync(driver_id).await?;

        let locks = OperationLocks::new();
        let distribution = distribute(driver_id, &driver, stores, config, &locks).await?;

        let writer = Arc::new(StorageSampleWriter::new(
            stores.samples.clone(),
            stores.realtime.clone(),
        ));
        let pipeline = Arc::new(Pipeline::start(writer, config.pipeline.clone()));
        let pool = Arc::new(SessionPool::new(
            driver.clone(),
            connector,
            pipeline.handle(),
            config.session.clone(),
        )
        .with_limits(config.max_sessions, config.overflow_policy));
        pool.apply_plan(&distribution);
        if let Err(err) = start_sessions(&pool, &driver, stores, &distribution).await {
            pool.stop_all().await;
            if let Err(shutdown_err) = pipeline.shutdown().await {
                tracing::warn!(
                    target: "fleet.orchestrator",
                    driver_id,
                    error = %shutdown_err,
                    "pipeline_shutdown_failed"
                );
            }
            return Err(err);
        }

        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(
            ProvisioningEngine::new(provisioner, pool.clone(), locks, config.provision.clone())
                .with_restart_sender(restart_tx),
        );
        let dispatch_cancel = CancellationToken::new();
        let dispatch = spawn_provisioning_loop(
            engine.clone(),
            driver_id,
            config.provision_poll_interval,
            dispatch_cancel.clone(),
        );

        let background_cancel = CancellationToken::new();
        let last_sync = Arc::new(Mutex::new(Some(report)));
        let mut background = vec![
            tokio::spawn(loops::restart_listener(
                RestartContext {
                    driver: driver.clone(),
                    pool: pool.clone(),
                    devices: stores.devices.clone(),
                    tags: stores.tags.clone(),
                    settle: config.restart_settle,
                },
                restart_rx,
                background_cancel.clone(),
            )),
            tokio::spawn(loops::write_back_loop(
                WriteBackContext {
                    driver: driver.clone(),
                    pool: pool.clone(),
                    devices: stores.devices.clone(),
                    writes: stores.writes.clone(),
                    batch: config.write_back_batch,
                },
                config.write_back_poll_interval,
                background_cancel.clone(),
            )),
            tokio::spawn(loops::health_loop(
                driver_id,
                pool.clone(),
                pipeline.clone(),
                config.health_interval,
                background_cancel.clone(),
            )),
        ];
        if let Some(interval) = config.reconcile_interval {
            background.push(tokio::spawn(loops::reconcile_loop(
                driver_id,
                reconciler.clone(),
                last_sync.clone(),
                interval,
                background_cancel.clone(),
            )));
        }

        tracing::info!(
            target: "fleet.orchestrator",
            driver_id,
            driver = %driver.name,
            sessions = distribution.sessions.len(),
            devices = distribution.assignments().len(),
            tags = distribution.assigned_tags(),
            "driver_started"
        );
        Ok(Self {
            driver,
            pool,
            pipeline,
            engine,
            reconciler,
            plan: distribution,
            last_sync,
            dispatch_cancel,
            background_cancel,
            dispatch: Mutex::new(Some(dispatch)),
            background: Mutex::new(background),
        })
    }

    /// 立即执行一次对账。
    pub(crate) async fn sync_now(&self) -> Result<SyncReport, OrchestratorError> {
        let report = self.reconciler.sync(self.driver.driver_id).await?;
        if let Ok(mut slot) = self.last_sync.lock() {
            *slot = Some(report.clone());
        }
        Ok(report)
    }

    pub(crate) fn status(&self) -> DriverStatus {
        DriverStatus {
            driver_id: self.driver.driver_id,
            name: self.driver.name.clone(),
            sessions: self.pool.statuses(),
            pipeline: self.pipeline.stats(),
            operations_in_flight: self.engine.locks().held_count(),
            required_sessions: self.plan.required_sessions,
            overflowed: self.plan.overflowed.clone(),
            unassigned: self.plan.unassigned.clone(),
            last_sync: self.last_sync.lock().ok().and_then(|slot| slot.clone()),
        }
    }

    /// 停止顺序：停止派发 -> 等待进行中的操作 -> 停止后台循环 -> 停止会话 -> 排空流水线。
    pub(crate) async fn shutdown(&self) -> Result<(), OrchestratorError> {
        let driver_id = self.driver.driver_id;
        self.dispatch_cancel.cancel();
        let dispatch = self.dispatch.lock().ok().and_then(|mut guard| guard.take());
        if let Some(dispatch) = dispatch {
            join_logged(driver_id, dispatch).await;
        }
        self.engine.locks().wait_idle().await;

        self.background_cancel.cancel();
        let background = self
            .background
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        for handle in background {
            join_logged(driver_id, handle).await;
        }

        self.pool.stop_all().await;
        self.pipeline.shutdown().await?;
        tracing::info!(target: "fleet.orchestrator", driver_id, "driver_stopped");
        Ok(())
    }
}

impl Drop for DriverRuntime {
    fn drop(&mut self) {
        self.dispatch_cancel.cancel();
        self.background_cancel.cancel();
    }
}

async fn join_logged(driver_id: DriverId, handle: JoinHandle<()>) {
    if let Err(err) = handle.await {
        tracing::warn!(
            target: "fleet.orchestrator",
            driver_id,
            error = %err,
            "background_task_failed"
        );
    }
}

/// 计算并持久化分配；未分配的设备清除会话。
async fn distribute(
    driver_id: DriverId,
    driver: &DriverConfig,
    stores: &Stores,
    config: &OrchestratorConfig,
    locks: &OperationLocks,
) -> Result<DistributionPlan, OrchestratorError> {
    let live = stores
        .devices
        .list_devices_by_status(driver_id, &config.reconcile.live_policy.live_codes())
        .await?;
    let counts = stores.tags.tag_counts(&live).await?;
    let loads: Vec<DeviceLoad> = live
        .iter()
        .zip(&counts)
        .map(|(device, count)| DeviceLoad {
            device_id: device.id,
            tag_count: count.tag_count,
            current_session: device.session_id,
        })
        .collect();
    let distribution = plan(
        &loads,
        driver.max_tags_per_session,
        config.max_sessions,
        config.overflow_policy,
        &|device_id| locks.is_locked(device_id),
    );
    stores
        .devices
        .save_assignments(&distribution.assignments())
        .await?;
    for device_id in &distribution.unassigned {
        stores.devices.assign_session(*device_id, None).await?;
    }
    Ok(distribution)
}

async fn start_sessions(
    pool: &SessionPool,
    driver: &DriverConfig,
    stores: &Stores,
    distribution: &DistributionPlan,
) -> Result<(), OrchestratorError> {
    for session in &distribution.sessions {
        let device_ids: Vec<DeviceId> = session.devices.iter().map(|d| d.device_id).collect();
        let tags = loops::load_monitored_tags(
            stores.devices.as_ref(),
            stores.tags.as_ref(),
            driver,
            &device_ids,
        )
        .await?;
        pool.start_session(session.session_id, tags).await;
    }
    Ok(())
}
