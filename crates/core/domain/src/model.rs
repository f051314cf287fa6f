//! 期望状态模型：驱动、通道、设备、标签。

use crate::status::DeviceStatus;
use serde::{Deserialize, Serialize};

pub type DriverId = i64;
pub type DeviceId = i64;
pub type SessionId = i32;

/// 协议连接安全模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    #[default]
    None,
    Sign,
    SignAndEncrypt,
}

impl SecurityMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(SecurityMode::None),
            "sign" => Some(SecurityMode::Sign),
            "sign_and_encrypt" | "signandencrypt" => Some(SecurityMode::SignAndEncrypt),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SecurityMode::None => "none",
            SecurityMode::Sign => "sign",
            SecurityMode::SignAndEncrypt => "sign_and_encrypt",
        }
    }
}

/// 一个外部网关端点的驱动配置。
///
/// 驱动启动时加载一次，运行期间不可变；修改后需重启驱动。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub driver_id: DriverId,
    pub name: String,
    /// 协议端点，例如 `opc.tcp://10.0.0.5:49320`。
    pub endpoint_url: String,
    pub security_mode: SecurityMode,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 单个会话可监控的最大标签数。
    pub max_tags_per_session: usize,
    pub publishing_interval_ms: u64,
    pub namespace_prefix: String,
    /// 节点地址模板，占位符：`{ns}`、`{channel}`、`{device}`、`{tag}`。
    pub address_template: String,
    /// 网关配置接口根地址，例如 `http://10.0.0.5:57412`。
    pub config_api_url: String,
    pub config_api_username: Option<String>,
    pub config_api_password: Option<String>,
    pub enabled: bool,
}

impl DriverConfig {
    pub const DEFAULT_NAMESPACE_PREFIX: &'static str = "ns=2;s=";
    pub const DEFAULT_ADDRESS_TEMPLATE: &'static str = "{ns}{channel}.{device}.{tag}";

    /// 渲染标签节点地址。
    pub fn node_address(&self, channel: &str, device: &str, tag: &str) -> String {
        let template = if self.address_template.trim().is_empty() {
            Self::DEFAULT_ADDRESS_TEMPLATE
        } else {
            self.address_template.as_str()
        };
        template
            .replace("{ns}", &self.namespace_prefix)
            .replace("{channel}", channel)
            .replace("{device}", device)
            .replace("{tag}", tag)
    }
}

/// 网关上的通道（设备分组）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub driver_id: DriverId,
    pub name: String,
    /// 用于创建/重建通道的 JSON 模板。
    pub definition: serde_json::Value,
}

/// 下发单元：设备。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub driver_id: DriverId,
    pub channel_name: String,
    /// 网关上的设备对象名。
    pub name: String,
    pub device_type_id: i64,
    pub definition: serde_json::Value,
    /// 存储层状态码，见 [`DeviceStatus`]。
    pub status: i32,
    pub session_id: Option<SessionId>,
}

impl Device {
    pub fn status(&self) -> Option<DeviceStatus> {
        DeviceStatus::from_code(self.status)
    }

    /// `channel.device` 形式的路径。
    pub fn path(&self) -> String {
        device_path(&self.channel_name, &self.name)
    }
}

pub fn device_path(channel: &str, device: &str) -> String {
    format!("{}.{}", channel, device)
}

/// 标签来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagScope {
    /// 设备类型模板标签，挂在该类型的所有设备上。
    Type,
    /// 单设备标签。
    Individual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub definition: serde_json::Value,
    pub scope: TagScope,
}

/// 合并类型标签与单设备标签；同名时单设备标签覆盖类型标签。
pub fn merge_tags(type_tags: Vec<Tag>, individual_tags: Vec<Tag>) -> Vec<Tag> {
    let mut merged: Vec<Tag> = type_tags
        .into_iter()
        .filter(|tag| !individual_tags.iter().any(|other| other.name == tag.name))
        .collect();
    merged.extend(individual_tags);
    merged
}

/// 待执行的标签写入请求。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub id: i64,
    pub driver_id: DriverId,
    pub device_id: DeviceId,
    pub tag_name: String,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn driver(template: &str) -> DriverConfig {
        DriverConfig {
            driver_id: 1,
            name: "kep-1".to_string(),
            endpoint_url: "opc.tcp://localhost:49320".to_string(),
            security_mode: SecurityMode::None,
            username: None,
            password: None,
            max_tags_per_session: 1000,
            publishing_interval_ms: 1000,
            namespace_prefix: DriverConfig::DEFAULT_NAMESPACE_PREFIX.to_string(),
            address_template: template.to_string(),
            config_api_url: "http://localhost:57412".to_string(),
            config_api_username: None,
            config_api_password: None,
            enabled: true,
        }
    }

    #[test]
    fn node_address_uses_default_template_when_blank() {
        assert_eq!(
            driver("").node_address("Line1", "Press4", "Temp"),
            "ns=2;s=Line1.Press4.Temp"
        );
        assert_eq!(
            driver("{ns}{channel}/{device}/{tag}").node_address("A", "B", "C"),
            "ns=2;s=A/B/C"
        );
    }

    #[test]
    fn individual_tag_overrides_type_tag() {
        let tag = |name: &str, scope, addr: &str| Tag {
            name: name.to_string(),
            definition: json!({ "address": addr }),
            scope,
        };
        let merged = merge_tags(
            vec![
                tag("Temp", TagScope::Type, "40001"),
                tag("Speed", TagScope::Type, "40002"),
            ],
            vec![tag("Temp", TagScope::Individual, "40101")],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "Speed");
        assert_eq!(merged[1].scope, TagScope::Individual);
        assert_eq!(merged[1].definition["address"], "40101");
    }

    #[test]
    fn security_mode_parses_loosely() {
        assert_eq!(SecurityMode::parse("SignAndEncrypt"), Some(SecurityMode::SignAndEncrypt));
        assert_eq!(SecurityMode::parse(""), Some(SecurityMode::None));
        assert_eq!(SecurityMode::parse("bogus"), None);
    }
}
