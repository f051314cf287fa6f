//! 网关采集代理：启动驱动编排并提供状态/控制 HTTP 接口。

mod handlers;
mod middleware;
mod routes;
mod utils;
mod wiring;

use fleet_config::AppConfig;
use fleet_orchestrator::Orchestrator;
use fleet_telemetry::init_tracing;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let stores = wiring::build_stores(&config).await?;
    let factory = wiring::gateway_factory(&config)?;
    let driver_store = stores.drivers.clone();
    let orchestrator = Arc::new(Orchestrator::new(
        stores,
        factory,
        wiring::orchestrator_config(&config),
    ));

    let driver_ids = if config.driver_ids.is_empty() {
        driver_store
            .list_drivers()
            .await?
            .into_iter()
            .filter(|driver| driver.enabled)
            .map(|driver| driver.driver_id)
            .collect()
    } else {
        config.driver_ids.clone()
    };
    // 单个驱动启动失败不影响其它驱动
    for driver_id in driver_ids {
        if let Err(err) = orchestrator.start(driver_id).await {
            tracing::error!(
                target: "fleet.agent",
                driver_id,
                error = %err,
                "driver_start_skipped"
            );
        }
    }

    let state = AppState {
        orchestrator: orchestrator.clone(),
    };
    let app = routes::create_app(state);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(target: "fleet.agent", addr = %config.http_addr, "http_listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.stop_all().await;
    tracing::info!(target: "fleet.agent", "agent_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "fleet.agent", error = %err, "signal_listener_failed");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::AppState;
    use domain::{Channel, Device, DriverConfig, SecurityMode};
    use fleet_gateway::{NAME_PROPERTY, SimulatedGateway};
    use fleet_orchestrator::{Orchestrator, OrchestratorConfig, SimulatedGatewayFactory, Stores};
    use fleet_storage::{
        InMemoryDeviceStore, InMemoryDriverStore, InMemorySampleStore, InMemoryTagStore,
        InMemoryWriteRequestStore,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn driver() -> DriverConfig {
        DriverConfig {
            driver_id: 1,
            name: "kep-1".to_string(),
            endpoint_url: "opc.tcp://sim:49320".to_string(),
            security_mode: SecurityMode::None,
            username: None,
            password: None,
            max_tags_per_session: 100,
            publishing_interval_ms: 1_000,
            namespace_prefix: DriverConfig::DEFAULT_NAMESPACE_PREFIX.to_string(),
            address_template: String::new(),
            config_api_url: "http://sim:57412".to_string(),
            config_api_username: None,
            config_api_password: None,
            enabled: true,
        }
    }

    /// 驱动 1，通道 Line1，类型 7 带两个标签。
    pub fn sim_state() -> (AppState, Arc<InMemoryDeviceStore>) {
        let drivers = Arc::new(InMemoryDriverStore::new());
        drivers.insert(driver()).expect("driver");
        let devices = Arc::new(InMemoryDeviceStore::new());
        devices
            .upsert_channel(Channel {
                driver_id: 1,
                name: "Line1".to_string(),
                definition: json!({ NAME_PROPERTY: "Line1" }),
            })
            .expect("channel");
        let tags = Arc::new(InMemoryTagStore::new());
        tags.add_type_tag(7, "Temp", json!({ "servermain.TAG_ADDRESS": "40001" }))
            .expect("tag");
        tags.add_type_tag(7, "Speed", json!({ "servermain.TAG_ADDRESS": "40002" }))
            .expect("tag");

        let stores = Stores {
            drivers,
            devices: devices.clone(),
            tags,
            samples: Arc::new(InMemorySampleStore::new()),
            realtime: None,
            writes: Arc::new(InMemoryWriteRequestStore::new()),
        };
        let config = OrchestratorConfig {
            tag_batch_delay: Duration::ZERO,
            restart_settle: Duration::from_millis(200),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            stores,
            Arc::new(SimulatedGatewayFactory::new(
                SimulatedGateway::with_reserved_channels(),
            )),
            config,
        );
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
        };
        (state, devices)
    }

    pub fn upsert_live_device(devices: &InMemoryDeviceStore, id: i64, name: &str) {
        devices
            .upsert_device(Device {
                id,
                driver_id: 1,
                channel_name: "Line1".to_string(),
                name: name.to_string(),
                device_type_id: 7,
                definition: json!({ NAME_PROPERTY: name }),
                status: 11,
                session_id: None,
            })
            .expect("device");
    }
}
