//! 内存存储实现
//!
//! 用于单元测试、集成测试以及 `sim` 演示模式。

pub mod device;
pub mod driver;
pub mod realtime;
pub mod sample;
pub mod tag;
pub mod write_request;

pub use device::*;
pub use driver::*;
pub use realtime::*;
pub use sample::*;
pub use tag::*;
pub use write_request::*;
