//! 协议会话抽象
//!
//! 真正的协议栈位于进程外部；这里只规定会话层需要的最小接口。
//! 通知通过 `mpsc::Sender<NotificationBatch>` 批量投递，回调里不做任何阻塞操作。

use crate::error::GatewayError;
use crate::types::{BrowseNode, MonitoredItem, NotificationBatch};
use async_trait::async_trait;
use domain::{DriverConfig, TagValue};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 建立协议会话
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    async fn connect(&self, driver: &DriverConfig)
    -> Result<Arc<dyn ProtocolSession>, GatewayError>;
}

/// 一条已建立的协议连接
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// 浏览子对象：`None` 为根（通道层），`Some("Line1")` 为该通道下的设备。
    async fn browse(&self, path: Option<&str>) -> Result<Vec<BrowseNode>, GatewayError>;

    /// 创建订阅，返回订阅 ID。
    async fn create_subscription(
        &self,
        publishing_interval_ms: u64,
        sink: mpsc::Sender<NotificationBatch>,
    ) -> Result<u32, GatewayError>;

    /// 添加监控项，返回被拒绝的客户端句柄。
    async fn add_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItem],
    ) -> Result<Vec<u32>, GatewayError>;

    async fn remove_monitored_items(
        &self,
        subscription_id: u32,
        client_handles: &[u32],
    ) -> Result<(), GatewayError>;

    async fn write_value(&self, node_address: &str, value: &TagValue)
    -> Result<(), GatewayError>;

    /// 保活探测（读取服务器状态）。
    async fn keep_alive(&self) -> Result<(), GatewayError>;

    async fn close(&self);
}
