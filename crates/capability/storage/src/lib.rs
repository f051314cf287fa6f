//! # Fleet Storage 模块
//!
//! 期望状态仓库与测点写入的统一抽象，支持多种后端。
//!
//! - [`traits`]：存储接口（驱动、设备/通道、标签、样本、最近值、写入请求）
//! - [`models`]：存储侧投影（会话分配、标签计数、最近值、写入结果）
//! - [`error`]：存储错误类型
//! - [`validation`]：状态码与驱动 ID 校验
//! - [`connection`]：PostgreSQL 连接池
//! - [`in_memory`]：`RwLock` 内存实现，用于测试与 `sim` 模式
//! - [`postgres`]：sqlx 实现，表结构见 `migrations/`
//! - [`redis`]：最近有效值缓存
//!
//! 状态码在进程内以 `DeviceStatus` 表示，只有在本 crate 的边界上才转换成整数。

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod redis;
pub mod traits;
pub mod validation;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use crate::redis::RedisRealtimeStore;
pub use traits::*;
pub use validation::*;

pub use in_memory::{
    InMemoryDeviceStore, InMemoryDriverStore, InMemoryRealtimeStore, InMemorySampleStore,
    InMemoryTagStore, InMemoryWriteRequestStore,
};

pub use postgres::{PgDeviceStore, PgDriverStore, PgSampleStore, PgTagStore, PgWriteRequestStore};
