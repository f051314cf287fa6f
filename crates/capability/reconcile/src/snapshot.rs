//! 期望/实际结构快照与差异计算（纯函数）

use domain::{Device, device_path};
use std::collections::{BTreeMap, BTreeSet};

/// 以 `_` 开头的通道为网关保留对象（`_System`、`_Statistics` 等），不参与对账。
pub fn is_reserved(name: &str) -> bool {
    name.starts_with('_')
}

/// 存储中在线设备按通道分组。
#[derive(Debug, Clone, Default)]
pub struct DesiredSnapshot {
    pub channels: BTreeMap<String, Vec<Device>>,
}

impl DesiredSnapshot {
    pub fn from_devices(devices: Vec<Device>) -> Self {
        let mut channels: BTreeMap<String, Vec<Device>> = BTreeMap::new();
        for device in devices {
            channels
                .entry(device.channel_name.clone())
                .or_default()
                .push(device);
        }
        Self { channels }
    }

    pub fn device_count(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    pub fn device_paths(&self) -> BTreeSet<String> {
        self.devices().map(Device::path).collect()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.channels.values().flatten()
    }
}

/// 浏览网关得到的结构。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualSnapshot {
    pub channels: BTreeSet<String>,
    /// `channel.device`
    pub devices: BTreeSet<String>,
}

impl ActualSnapshot {
    pub fn insert_channel(&mut self, name: &str) {
        if !is_reserved(name) {
            self.channels.insert(name.to_string());
        }
    }

    pub fn insert_device(&mut self, channel: &str, device: &str) {
        if !is_reserved(channel) {
            self.devices.insert(device_path(channel, device));
        }
    }
}

/// 期望与实际之间的差异。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drift {
    pub missing_channels: Vec<String>,
    pub missing_devices: Vec<String>,
    pub extra_channels: Vec<String>,
    pub extra_devices: Vec<String>,
}

impl Drift {
    pub fn is_empty(&self) -> bool {
        self.missing_channels.is_empty() && self.missing_devices.is_empty()
    }
}

pub fn diff(desired: &DesiredSnapshot, actual: &ActualSnapshot) -> Drift {
    let desired_channels: BTreeSet<String> = desired.channels.keys().cloned().collect();
    let desired_devices = desired.device_paths();
    Drift {
        missing_channels: desired_channels.difference(&actual.channels).cloned().collect(),
        missing_devices: desired_devices.difference(&actual.devices).cloned().collect(),
        extra_channels: actual.channels.difference(&desired_channels).cloned().collect(),
        extra_devices: actual.devices.difference(&desired_devices).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device(id: i64, channel: &str, name: &str) -> Device {
        Device {
            id,
            driver_id: 1,
            channel_name: channel.to_string(),
            name: name.to_string(),
            device_type_id: 1,
            definition: json!({}),
            status: 11,
            session_id: None,
        }
    }

    #[test]
    fn reserved_objects_never_count_as_actual() {
        let mut actual = ActualSnapshot::default();
        actual.insert_channel("_System");
        actual.insert_device("_Statistics", "Line1");
        actual.insert_channel("Line1");
        assert_eq!(actual.channels.len(), 1);
        assert!(actual.devices.is_empty());
    }

    #[test]
    fn drift_lists_missing_and_extra() {
        let desired = DesiredSnapshot::from_devices(vec![
            device(1, "Line1", "Press4"),
            device(2, "Line1", "Press5"),
            device(3, "Line2", "Robot1"),
        ]);
        let mut actual = ActualSnapshot::default();
        actual.insert_channel("Line1");
        actual.insert_channel("Legacy");
        actual.insert_device("Line1", "Press4");
        actual.insert_device("Legacy", "Old");

        let drift = diff(&desired, &actual);
        assert_eq!(drift.missing_channels, vec!["Line2"]);
        assert_eq!(drift.missing_devices, vec!["Line1.Press5", "Line2.Robot1"]);
        assert_eq!(drift.extra_channels, vec!["Legacy"]);
        assert_eq!(drift.extra_devices, vec!["Legacy.Old"]);
        assert!(!drift.is_empty());
    }

    #[test]
    fn converged_state_has_no_missing() {
        let desired = DesiredSnapshot::from_devices(vec![device(1, "Line1", "Press4")]);
        let mut actual = ActualSnapshot::default();
        actual.insert_channel("Line1");
        actual.insert_device("Line1", "Press4");
        assert!(diff(&desired, &actual).is_empty());
    }
}
