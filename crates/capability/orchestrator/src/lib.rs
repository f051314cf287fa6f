//! # 驱动编排能力模块
//!
//! 每个驱动的生命周期：
//!
//! ```text
//! start:  加载驱动 -> 对账一次 -> 分配并持久化 -> 启动流水线 -> 启动会话
//!         -> 下发轮询 / 会话重启监听 / 标签回写 / 健康检查 / (可选) 周期对账
//! stop:   停止派发 -> 等待进行中的操作 -> 停止会话 -> 排空流水线
//! ```
//!
//! 启动阶段的致命错误以 [`OrchestratorError`] 返回给调用方，不自动重试。

mod error;
mod factory;
mod loops;
mod orchestrator;
mod runtime;
mod status;

pub use error::OrchestratorError;
pub use factory::{GatewayFactory, RestGatewayFactory, SimulatedGatewayFactory};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Stores};
pub use status::DriverStatus;
