//! # 协议会话能力模块
//!
//! - [`Session`]：单条协议连接的监督任务（连接、订阅、保活、固定延迟重连）
//! - [`plan`]：按单会话标签上限把设备装箱到有限个会话
//! - [`SessionPool`]：驱动下运行中的会话与设备 -> 会话分配表
//!
//! ```text
//! ProtocolSession ──NotificationBatch──► Session 监督任务 ──Sample──► PipelineHandle
//!                                           ▲
//!                        write_tag / unsubscribe_device（命令通道）
//! ```

mod error;
mod pool;
mod session;

pub use error::SessionError;
pub use pool::{
    DeviceLoad, DistributionPlan, OverflowPolicy, Placement, SessionLoad, SessionPool, SessionStatus,
    plan,
};
pub use session::{MonitoredTag, Session, SessionConfig, SessionState, SessionStats};
