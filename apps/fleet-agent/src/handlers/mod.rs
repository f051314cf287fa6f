//! Handlers 模块

pub mod drivers;
pub mod health;

pub use drivers::*;
pub use health::*;
