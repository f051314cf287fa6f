//! 按驱动构建网关接口
//!
//! 协议栈在进程外部，[`GatewayFactory`] 决定每个驱动使用哪一对
//! 配置接口 / 协议连接器。

use domain::DriverConfig;
use fleet_gateway::{
    GatewayConfigApi, GatewayError, ProtocolConnector, RestConfigOptions, RestGatewayConfig,
    SimulatedGateway,
};
use std::sync::Arc;
use std::time::Duration;

pub trait GatewayFactory: Send + Sync {
    fn config_api(&self, driver: &DriverConfig) -> Result<Arc<dyn GatewayConfigApi>, GatewayError>;

    fn connector(&self, driver: &DriverConfig)
    -> Result<Arc<dyn ProtocolConnector>, GatewayError>;
}

/// 所有驱动共用同一个进程内模拟网关。
#[derive(Clone, Default)]
pub struct SimulatedGatewayFactory {
    gateway: SimulatedGateway,
}

impl SimulatedGatewayFactory {
    pub fn new(gateway: SimulatedGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &SimulatedGateway {
        &self.gateway
    }
}

impl GatewayFactory for SimulatedGatewayFactory {
    fn config_api(&self, _driver: &DriverConfig) -> Result<Arc<dyn GatewayConfigApi>, GatewayError> {
        Ok(Arc::new(self.gateway.clone()))
    }

    fn connector(
        &self,
        _driver: &DriverConfig,
    ) -> Result<Arc<dyn ProtocolConnector>, GatewayError> {
        Ok(Arc::new(self.gateway.clone()))
    }
}

/// 配置走驱动的 REST 端点，协议连接由外部提供的连接器完成。
pub struct RestGatewayFactory {
    connector: Arc<dyn ProtocolConnector>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RestGatewayFactory {
    pub fn new(
        connector: Arc<dyn ProtocolConnector>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            connect_timeout,
            request_timeout,
        }
    }
}

impl GatewayFactory for RestGatewayFactory {
    fn config_api(&self, driver: &DriverConfig) -> Result<Arc<dyn GatewayConfigApi>, GatewayError> {
        let client = RestGatewayConfig::new(RestConfigOptions {
            base_url: driver.config_api_url.clone(),
            username: driver.config_api_username.clone(),
            password: driver.config_api_password.clone(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        })?;
        Ok(Arc::new(client))
    }

    fn connector(
        &self,
        _driver: &DriverConfig,
    ) -> Result<Arc<dyn ProtocolConnector>, GatewayError> {
        Ok(self.connector.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::SecurityMode;

    fn driver(config_api_url: &str) -> DriverConfig {
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
            config_api_url: config_api_url.to_string(),
            config_api_username: Some("admin".to_string()),
            config_api_password: None,
            enabled: true,
        }
    }

    #[test]
    fn rest_factory_rejects_bad_config_url() {
        let factory = RestGatewayFactory::new(
            Arc::new(SimulatedGateway::new()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(factory.config_api(&driver("http://10.0.0.5:57412")).is_ok());
        assert!(factory.config_api(&driver("not a url")).is_err());
        assert!(factory.connector(&driver("not a url")).is_ok());
    }
}
