//! 下发轮询循环
//!
//! 每个周期列出驱动下的待处理设备，每台设备在独立任务中处理。
//! 取消后不再派发新操作，并等待进行中的操作结束。

use crate::engine::{ProcessOutcome, ProvisioningEngine};
use domain::DriverId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub fn spawn_provisioning_loop(
    engine: Arc<ProvisioningEngine>,
    driver_id: DriverId,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_provisioning_loop(engine, driver_id, poll_interval, cancel))
}

async fn run_provisioning_loop(
    engine: Arc<ProvisioningEngine>,
    driver_id: DriverId,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<ProcessOutcome> = JoinSet::new();
    tracing::info!(
        target: "fleet.provision",
        driver_id,
        poll_interval_ms = poll_interval.as_millis() as u64,
        "provisioning_loop_started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = joined {
                    tracing::error!(
                        target: "fleet.provision",
                        driver_id,
                        error = %err,
                        "operation_task_failed"
                    );
                }
            }
            _ = ticker.tick() => {
                dispatch_pending(&engine, driver_id, &mut in_flight).await;
            }
        }
    }

    let remaining = in_flight.len();
    while in_flight.join_next().await.is_some() {}
    tracing::info!(
        target: "fleet.provision",
        driver_id,
        drained = remaining,
        "provisioning_loop_stopped"
    );
}

async fn dispatch_pending(
    engine: &Arc<ProvisioningEngine>,
    driver_id: DriverId,
    in_flight: &mut JoinSet<ProcessOutcome>,
) {
    let pending = match engine.pending_devices(driver_id).await {
        Ok(pending) => pending,
        Err(err) => {
            tracing::warn!(
                target: "fleet.provision",
                driver_id,
                error = %err,
                "pending_poll_failed"
            );
            return;
        }
    };
    let mut dispatched = 0usize;
    for device in pending {
        if engine.locks().is_locked(device.id) {
            continue;
        }
        let engine = engine.clone();
        in_flight.spawn(async move {
            engine
                .process_device_operation(device.id, device.status, driver_id)
                .await
        });
        dispatched += 1;
    }
    if dispatched > 0 {
        tracing::debug!(
            target: "fleet.provision",
            driver_id,
            dispatched,
            "pending_dispatched"
        );
    }
}
