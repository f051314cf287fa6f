//! # 网关接口能力模块
//!
//! - [`GatewayConfigApi`]：网关配置接口（通道/设备/标签的增删改），
//!   [`RestGatewayConfig`] 为 REST 实现
//! - [`ProtocolConnector`] / [`ProtocolSession`]：协议会话抽象（浏览、订阅、写入、保活）
//! - [`SimulatedGateway`]：同时实现以上两类接口的进程内模拟网关
//!
//! ```text
//! provision / reconcile ──► GatewayConfigApi ──► 网关配置端点
//! session               ──► ProtocolSession  ──► 网关协议端点
//!                              │
//!                              ▼ mpsc::Sender<NotificationBatch>
//!                           会话监督任务
//! ```

mod config_api;
mod error;
mod protocol;
mod simulated;
mod types;

pub use config_api::{GatewayConfigApi, RestConfigOptions, RestGatewayConfig};
pub use error::GatewayError;
pub use protocol::{ProtocolConnector, ProtocolSession};
pub use simulated::{SimulatedGateway, SimulatedSession};
pub use types::*;
