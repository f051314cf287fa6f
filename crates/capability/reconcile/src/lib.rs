//! # 对账能力模块
//!
//! 把存储中的期望结构（在线设备按通道分组）与浏览网关得到的实际结构比较，
//! 分批补齐缺失的通道与设备（设备成功后立即补标签），最后复查。
//! 从不删除网关对象；多余对象只出现在 [`SyncReport`] 里。

mod engine;
mod error;
mod snapshot;

pub use engine::{ReconcileConfig, Reconciler, SyncReport};
pub use error::ReconcileError;
pub use snapshot::{ActualSnapshot, DesiredSnapshot, Drift, diff, is_reserved};
