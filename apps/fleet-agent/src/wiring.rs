//! 进程配置到编排层的装配。

use domain::LiveStatusPolicy;
use fleet_config::AppConfig;
use fleet_gateway::SimulatedGateway;
use fleet_orchestrator::{GatewayFactory, OrchestratorConfig, SimulatedGatewayFactory, Stores};
use fleet_pipeline::PipelineConfig;
use fleet_provision::ProvisionConfig;
use fleet_reconcile::ReconcileConfig;
use fleet_session::{OverflowPolicy, SessionConfig};
use fleet_storage::{
    PgDeviceStore, PgDriverStore, PgSampleStore, PgTagStore, PgWriteRequestStore,
    RealtimeStore, RedisRealtimeStore, StorageError, connect_pool,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    #[error("unsupported protocol mode: {0}")]
    UnsupportedProtocol(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub fn orchestrator_config(config: &AppConfig) -> OrchestratorConfig {
    let live_policy = LiveStatusPolicy {
        include_deactivated: config.live_includes_deactivated,
    };
    OrchestratorConfig {
        max_sessions: config.max_sessions,
        overflow_policy: if config.overflow_skip {
            OverflowPolicy::Skip
        } else {
            OverflowPolicy::ForceAssign
        },
        pipeline: PipelineConfig {
            capacity: config.pipeline_capacity,
            batch_size: config.pipeline_batch_size,
            flush_interval: Duration::from_millis(config.pipeline_flush_interval_ms),
        },
        session: SessionConfig {
            reconnect_delay: Duration::from_millis(config.session_reconnect_delay_ms),
            keep_alive_interval: Duration::from_millis(config.session_keep_alive_interval_ms),
            ..SessionConfig::default()
        },
        provision: ProvisionConfig {
            unsubscribe_settle: Duration::from_millis(config.unsubscribe_settle_ms),
        },
        reconcile: ReconcileConfig {
            channel_batch_size: config.reconcile_channel_batch,
            device_batch_size: config.reconcile_device_batch,
            batch_delay: Duration::from_millis(config.reconcile_batch_delay_ms),
            live_policy,
        },
        tag_batch_size: config.provision_tag_batch,
        tag_batch_delay: Duration::from_millis(config.provision_batch_delay_ms),
        provision_poll_interval: Duration::from_millis(config.provision_poll_interval_ms),
        write_back_poll_interval: Duration::from_millis(config.write_back_poll_interval_ms),
        write_back_batch: OrchestratorConfig::default().write_back_batch,
        health_interval: Duration::from_millis(config.health_interval_ms),
        reconcile_interval: config.reconcile_interval_seconds.map(Duration::from_secs),
        restart_settle: Duration::from_millis(config.restart_settle_ms),
    }
}

/// 连接 PostgreSQL（以及可选的 Redis），组装存储。
pub async fn build_stores(config: &AppConfig) -> Result<Stores, WiringError> {
    let pool = connect_pool(&config.database_url).await?;
    let realtime = match &config.redis_url {
        Some(url) => {
            let store = RedisRealtimeStore::connect(url, config.redis_last_value_ttl_seconds)?;
            Some(Arc::new(store) as Arc<dyn RealtimeStore>)
        }
        None => None,
    };
    Ok(Stores {
        drivers: Arc::new(PgDriverStore::new(pool.clone())),
        devices: Arc::new(PgDeviceStore::new(pool.clone())),
        tags: Arc::new(PgTagStore::new(pool.clone())),
        samples: Arc::new(PgSampleStore::new(pool.clone())),
        realtime,
        writes: Arc::new(PgWriteRequestStore::new(pool)),
    })
}

/// 按协议模式选择网关工厂。
pub fn gateway_factory(config: &AppConfig) -> Result<Arc<dyn GatewayFactory>, WiringError> {
    match config.protocol_mode.as_str() {
        "sim" => Ok(Arc::new(SimulatedGatewayFactory::new(
            SimulatedGateway::with_reserved_channels(),
        ))),
        other => Err(WiringError::UnsupportedProtocol(other.to_string())),
    }
}
