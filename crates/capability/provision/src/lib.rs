//! # 设备下发能力模块
//!
//! - [`OperationLocks`]：设备级互斥，守卫丢弃即释放
//! - [`Provisioner`]：通道/设备/标签的网关配置原语（对账同样使用）
//! - [`ProvisioningEngine`]：待处理状态码 -> 网关配置调用 -> 状态回写
//! - [`spawn_provisioning_loop`]：按周期轮询待处理设备并派发
//!
//! ```text
//! devices(status=P) ──poll──► ProvisioningEngine ──► GatewayConfigApi
//!                                   │
//!                                   ├──► devices(status=P+1 / P+2)
//!                                   └──► RestartRequest ──► 编排层
//! ```

mod engine;
mod error;
mod lock;
mod primitives;
mod worker;

pub use engine::{
    ProcessOutcome, ProvisionConfig, ProvisioningEngine, RestartRequest, SkipReason,
};
pub use error::ProvisionError;
pub use lock::{OperationGuard, OperationLocks};
pub use primitives::{Provisioner, named_definition};
pub use worker::spawn_provisioning_loop;
