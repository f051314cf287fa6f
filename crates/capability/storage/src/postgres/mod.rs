//! PostgreSQL 存储实现
//!
//! 表结构见 `migrations/0001_fleet_init.sql`。所有 SQL 使用参数绑定；
//! 状态码在写入前经 `ensure_status_code` 校验。

pub mod device;
pub mod driver;
pub mod sample;
pub mod tag;
pub mod write_request;

pub use device::*;
pub use driver::*;
pub use sample::*;
pub use tag::*;
pub use write_request::*;
