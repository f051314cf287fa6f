//! 网关接口公共类型

use domain::TagNotification;
use serde_json::Value;

use crate::error::GatewayError;

/// 对象名字段（通道、设备、标签定义中通用）
pub const NAME_PROPERTY: &str = "common.ALLTYPES_NAME";

/// 设备数据采集开关字段
pub const DATA_COLLECTION_PROPERTY: &str = "servermain.DEVICE_DATA_COLLECTION";

/// 读取 JSON 定义中的对象名
pub fn definition_name(definition: &Value) -> Result<&str, GatewayError> {
    definition
        .get(NAME_PROPERTY)
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| GatewayError::InvalidDefinition(format!("missing {NAME_PROPERTY}")))
}

/// 创建类调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    /// 已存在，已就地更新
    Updated,
}

/// 浏览得到的节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseNode {
    pub name: String,
    /// 以 `.` 连接的对象路径，例如 `Line1.Press4`
    pub path: String,
}

/// 订阅中的一个监控项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItem {
    pub client_handle: u32,
    pub node_address: String,
}

/// 一条带客户端句柄的数据变化通知
#[derive(Debug, Clone, PartialEq)]
pub struct ItemNotification {
    pub client_handle: u32,
    pub notification: TagNotification,
}

/// 协议栈一次回调投递的通知批次
pub type NotificationBatch = Vec<ItemNotification>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_name_requires_non_empty_name() {
        assert_eq!(
            definition_name(&json!({ NAME_PROPERTY: "Line1" })).expect("name"),
            "Line1"
        );
        assert!(definition_name(&json!({ NAME_PROPERTY: " " })).is_err());
        assert!(definition_name(&json!({})).is_err());
    }
}
