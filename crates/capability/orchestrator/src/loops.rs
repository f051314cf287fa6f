//! 驱动后台循环：会话重启、标签回写、健康检查、周期对账。
//!
//! 每个循环都在 `cancel` 触发后退出，由 [`crate::runtime::DriverRuntime`] 等待结束。

use domain::{DeviceId, DriverConfig, SessionId, TagValue};
use fleet_pipeline::Pipeline;
use fleet_provision::RestartRequest;
use fleet_reconcile::{Reconciler, SyncReport};
use fleet_session::{MonitoredTag, SessionPool};
use fleet_storage::{DeviceStore, StorageError, TagStore, WriteOutcome, WriteRequestStore};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// 从存储重新读取设备与有效标签，生成监控项。已不存在的设备被跳过。
pub(crate) async fn load_monitored_tags(
    devices: &dyn DeviceStore,
    tags: &dyn TagStore,
    driver: &DriverConfig,
    device_ids: &[DeviceId],
) -> Result<Vec<MonitoredTag>, StorageError> {
    let mut monitored = Vec::new();
    for device_id in device_ids {
        let Some(device) = devices.find_device(*device_id).await? else {
            continue;
        };
        let effective = tags.effective_tags(&device).await?;
        monitored.extend(MonitoredTag::for_device(driver, &device, &effective));
    }
    Ok(monitored)
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub(crate) struct RestartContext {
    pub driver: Arc<DriverConfig>,
    pub pool: Arc<SessionPool>,
    pub devices: Arc<dyn DeviceStore>,
    pub tags: Arc<dyn TagStore>,
    pub settle: Duration,
}

/// 等待 `settle` 后重启会话；等待期间到达的同一会话请求合并为一次重启。
pub(crate) async fn restart_listener(
    ctx: RestartContext,
    mut requests: mpsc::UnboundedReceiver<RestartRequest>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(ctx.settle) => {}
        }
        let mut sessions = BTreeSet::from([first.session_id]);
        while let Ok(request) = requests.try_recv() {
            sessions.insert(request.session_id);
        }
        for session_id in sessions {
            restart_session(&ctx, session_id).await;
        }
    }
}

async fn restart_session(ctx: &RestartContext, session_id: SessionId) {
    let device_ids = ctx.pool.devices_of(session_id);
    let tags = match load_monitored_tags(
        ctx.devices.as_ref(),
        ctx.tags.as_ref(),
        &ctx.driver,
        &device_ids,
    )
    .await
    {
        Ok(tags) => tags,
        Err(err) => {
            tracing::warn!(
                target: "fleet.orchestrator",
                driver_id = ctx.driver.driver_id,
                session_id,
                error = %err,
                "session_restart_failed"
            );
            return;
        }
    };
    ctx.pool.restart_session(session_id, tags).await;
}

pub(crate) struct WriteBackContext {
    pub driver: Arc<DriverConfig>,
    pub pool: Arc<SessionPool>,
    pub devices: Arc<dyn DeviceStore>,
    pub writes: Arc<dyn WriteRequestStore>,
    pub batch: usize,
}

pub(crate) async fn write_back_loop(
    ctx: WriteBackContext,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = ticker(poll_interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = process_pending_writes(&ctx).await {
                    tracing::warn!(
                        target: "fleet.orchestrator",
                        driver_id = ctx.driver.driver_id,
                        error = %err,
                        "write_back_poll_failed"
                    );
                }
            }
        }
    }
}

/// 每个待写请求只写一次，结果回写存储。
async fn process_pending_writes(ctx: &WriteBackContext) -> Result<usize, StorageError> {
    let driver_id = ctx.driver.driver_id;
    let pending = ctx.writes.list_pending_writes(driver_id, ctx.batch).await?;
    for request in &pending {
        let outcome = match ctx.devices.find_device(request.device_id).await? {
            None => WriteOutcome::Failed(format!("device {} not found", request.device_id)),
            Some(device) => match ctx.pool.session_for_device(device.id) {
                None => WriteOutcome::Failed(format!("device {} has no session", device.id)),
                Some(session) => {
                    let node_address =
                        ctx.driver
                            .node_address(&device.channel_name, &device.name, &request.tag_name);
                    match session
                        .write_tag(&node_address, TagValue::from_json(&request.value))
                        .await
                    {
                        Ok(()) => WriteOutcome::Success,
                        Err(err) => WriteOutcome::Failed(err.to_string()),
                    }
                }
            },
        };
        match &outcome {
            WriteOutcome::Success => fleet_telemetry::record_write_back_success(),
            WriteOutcome::Failed(reason) => {
                fleet_telemetry::record_write_back_failure();
                tracing::warn!(
                    target: "fleet.orchestrator",
                    driver_id,
                    request_id = request.id,
                    device_id = request.device_id,
                    tag = %request.tag_name,
                    reason = %reason,
                    "write_back_failed"
                );
            }
        }
        ctx.writes.complete_write(request.id, &outcome).await?;
    }
    Ok(pending.len())
}

pub(crate) async fn health_loop(
    driver_id: domain::DriverId,
    pool: Arc<SessionPool>,
    pipeline: Arc<Pipeline>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = ticker(interval);
    // 首个 tick 立即返回，跳过
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let statuses = pool.statuses();
                let connected = statuses.iter().filter(|s| s.state.is_connected()).count();
                for status in statuses.iter().filter(|s| !s.state.is_connected()) {
                    tracing::warn!(
                        target: "fleet.orchestrator",
                        driver_id,
                        session_id = status.session_id,
                        state = status.state.as_str(),
                        reconnects = status.stats.reconnects,
                        "session_unhealthy"
                    );
                }
                let stats = pipeline.stats();
                tracing::info!(
                    target: "fleet.orchestrator",
                    driver_id,
                    sessions = statuses.len(),
                    connected,
                    received = stats.received,
                    processed = stats.processed,
                    queued = stats.queued,
                    error_batches = stats.error_batches,
                    "driver_health"
                );
            }
        }
    }
}

pub(crate) async fn reconcile_loop(
    driver_id: domain::DriverId,
    reconciler: Arc<Reconciler>,
    last_sync: Arc<Mutex<Option<SyncReport>>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = ticker(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match reconciler.sync(driver_id).await {
                Ok(report) => {
                    if let Ok(mut slot) = last_sync.lock() {
                        *slot = Some(report);
                    }
                }
                Err(err) => tracing::warn!(
                    target: "fleet.orchestrator",
                    driver_id,
                    error = %err,
                    "periodic_reconcile_failed"
                ),
            },
        }
    }
}
