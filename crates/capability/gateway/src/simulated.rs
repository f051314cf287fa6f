//! 进程内模拟网关
//!
//! 同时实现 [`GatewayConfigApi`] 与 [`ProtocolConnector`]，持有一份通道/设备/标签
//! 地址空间，用于测试以及宿主进程的 `sim` 协议模式。支持故障注入与调用记录。

use crate::config_api::GatewayConfigApi;
use crate::error::GatewayError;
use crate::protocol::{ProtocolConnector, ProtocolSession};
use crate::types::{
    ApplyOutcome, BrowseNode, ItemNotification, MonitoredItem, NotificationBatch, definition_name,
};
use async_trait::async_trait;
use domain::{DriverConfig, TagNotification, TagValue};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default, Clone)]
struct SimDevice {
    definition: Value,
    tags: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Clone)]
struct SimChannel {
    definition: Value,
    devices: BTreeMap<String, SimDevice>,
}

struct SimSubscription {
    session_id: u32,
    sink: mpsc::Sender<NotificationBatch>,
    items: HashMap<u32, String>,
}

#[derive(Default)]
struct SimState {
    channels: BTreeMap<String, SimChannel>,
    subscriptions: HashMap<u32, SimSubscription>,
    open_sessions: HashSet<u32>,
    fail_objects: HashSet<String>,
    connect_failures: usize,
    keep_alive_failing: bool,
    written: Vec<(String, TagValue)>,
    calls: Vec<String>,
    call_delay: Duration,
}

struct SimInner {
    state: Mutex<SimState>,
    next_id: AtomicU32,
}

/// 模拟网关；克隆共享同一地址空间
#[derive(Clone)]
pub struct SimulatedGateway {
    inner: Arc<SimInner>,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState::default()),
                next_id: AtomicU32::new(1),
            }),
        }
    }

    /// 带系统保留通道（`_System`、`_Statistics`）的网关
    pub fn with_reserved_channels() -> Self {
        let gateway = Self::new();
        {
            let mut state = gateway.state();
            for name in ["_System", "_Statistics"] {
                state.channels.insert(name.to_string(), SimChannel::default());
            }
        }
        gateway
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // 模拟器不跨 await 持锁，中毒时沿用内部数据
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn next_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 让指定对象路径（`Line1`、`Line1.Press4`、`Line1.Press4.Temp`）的创建失败
    pub fn fail_on(&self, path: &str) {
        self.state().fail_objects.insert(path.to_string());
    }

    /// 每次配置调用前等待的时间
    pub fn set_call_delay(&self, delay: Duration) {
        self.state().call_delay = delay;
    }

    async fn delay(&self) {
        let delay = self.state().call_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn clear_failures(&self) {
        self.state().fail_objects.clear();
    }

    /// 接下来 `count` 次连接失败
    pub fn fail_next_connects(&self, count: usize) {
        self.state().connect_failures = count;
    }

    pub fn set_keep_alive_failing(&self, failing: bool) {
        self.state().keep_alive_failing = failing;
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.state().channels.contains_key(channel)
    }

    pub fn has_device(&self, channel: &str, device: &str) -> bool {
        self.state()
            .channels
            .get(channel)
            .is_some_and(|c| c.devices.contains_key(device))
    }

    pub fn tag_names(&self, channel: &str, device: &str) -> Vec<String> {
        self.state()
            .channels
            .get(channel)
            .and_then(|c| c.devices.get(device))
            .map(|d| d.tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn device_definition(&self, channel: &str, device: &str) -> Option<Value> {
        self.state()
            .channels
            .get(channel)
            .and_then(|c| c.devices.get(device))
            .map(|d| d.definition.clone())
    }

    /// 直接放入设备（模拟漂移前已存在的对象）
    pub fn insert_device(&self, channel: &str, device: &str) {
        let mut state = self.state();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .devices
            .entry(device.to_string())
            .or_default();
    }

    /// 记录的配置调用，例如 `create_device Line1.Press4`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn written_values(&self) -> Vec<(String, TagValue)> {
        self.state().written.clone()
    }

    /// 当前所有订阅监控的节点地址（去重排序）
    pub fn monitored_addresses(&self) -> Vec<String> {
        let state = self.state();
        let mut addresses: Vec<String> = state
            .subscriptions
            .values()
            .flat_map(|sub| sub.items.values().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        addresses.sort();
        addresses
    }

    pub fn open_session_count(&self) -> usize {
        self.state().open_sessions.len()
    }

    /// 向监控该节点的所有订阅推送一条通知，返回投递的订阅数
    pub async fn publish(&self, node_address: &str, notification: TagNotification) -> usize {
        let targets: Vec<(mpsc::Sender<NotificationBatch>, u32)> = {
            let state = self.state();
            state
                .subscriptions
                .values()
                .flat_map(|sub| {
                    sub.items
                        .iter()
                        .filter(move |(_, address)| address.as_str() == node_address)
                        .map(move |(handle, _)| (sub.sink.clone(), *handle))
                })
                .collect()
        };
        let mut delivered = 0;
        for (sink, client_handle) in targets {
            let batch = vec![ItemNotification {
                client_handle,
                notification: notification.clone(),
            }];
            if sink.send(batch).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn check_failure(state: &SimState, path: &str) -> Result<(), GatewayError> {
        if state.fail_objects.contains(path) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: format!("injected failure for {path}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayConfigApi for SimulatedGateway {
    async fn create_or_update_channel(
        &self,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError> {
        self.delay().await;
        let name = definition_name(definition)?.to_string();
        let mut state = self.state();
        state.calls.push(format!("create_channel {name}"));
        Self::check_failure(&state, &name)?;
        match state.channels.get_mut(&name) {
            Some(channel) => {
                channel.definition = definition.clone();
                Ok(ApplyOutcome::Updated)
            }
            None => {
                state.channels.insert(
                    name,
                    SimChannel {
                        definition: definition.clone(),
                        devices: BTreeMap::new(),
                    },
                );
                Ok(ApplyOutcome::Created)
            }
        }
    }

    async fn delete_channel(&self, channel: &str) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(format!("delete_channel {channel}"));
        state.channels.remove(channel);
        Ok(())
    }

    async fn create_or_update_device(
        &self,
        channel: &str,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError> {
        self.delay().await;
        let name = definition_name(definition)?.to_string();
        let path = format!("{channel}.{name}");
        let mut state = self.state();
        state.calls.push(format!("create_device {path}"));
        Self::check_failure(&state, &path)?;
        let parent = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| GatewayError::NotFound(format!("channel {channel}")))?;
        match parent.devices.get_mut(&name) {
            Some(device) => {
                device.definition = definition.clone();
                Ok(ApplyOutcome::Updated)
            }
            None => {
                parent.devices.insert(
                    name,
                    SimDevice {
                        definition: definition.clone(),
                        tags: BTreeMap::new(),
                    },
                );
                Ok(ApplyOutcome::Created)
            }
        }
    }

    async fn delete_device(&self, channel: &str, device: &str) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(format!("delete_device {channel}.{device}"));
        if let Some(parent) = state.channels.get_mut(channel) {
            parent.devices.remove(device);
        }
        Ok(())
    }

    async fn create_or_update_tag(
        &self,
        channel: &str,
        device: &str,
        definition: &Value,
    ) -> Result<ApplyOutcome, GatewayError> {
        self.delay().await;
        let name = definition_name(definition)?.to_string();
        let path = format!("{channel}.{device}.{name}");
        let mut state = self.state();
        state.calls.push(format!("create_tag {path}"));
        Self::check_failure(&state, &path)?;
        let parent = state
            .channels
            .get_mut(channel)
            .and_then(|c| c.devices.get_mut(device))
            .ok_or_else(|| GatewayError::NotFound(format!("device {channel}.{device}")))?;
        match parent.tags.insert(name, definition.clone()) {
            Some(_) => Ok(ApplyOutcome::Updated),
            None => Ok(ApplyOutcome::Created),
        }
    }

    async fn delete_tag(
        &self,
        channel: &str,
        device: &str,
        tag: &str,
    ) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.state();
        state.calls.push(format!("delete_tag {channel}.{device}.{tag}"));
        if let Some(parent) = state
            .channels
            .get_mut(channel)
            .and_then(|c| c.devices.get_mut(device))
        {
            parent.tags.remove(tag);
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolConnector for SimulatedGateway {
    async fn connect(
        &self,
        driver: &DriverConfig,
    ) -> Result<Arc<dyn ProtocolSession>, GatewayError> {
        let session_id = self.next_id();
        {
            let mut state = self.state();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(GatewayError::Transport(format!(
                    "connection refused: {}",
                    driver.endpoint_url
                )));
            }
            state.open_sessions.insert(session_id);
        }
        Ok(Arc::new(SimulatedSession {
            gateway: self.clone(),
            session_id,
        }))
    }
}

/// 模拟网关上的一条协议连接
pub struct SimulatedSession {
    gateway: SimulatedGateway,
    session_id: u32,
}

impl SimulatedSession {
    fn ensure_open(&self, state: &SimState) -> Result<(), GatewayError> {
        if !state.open_sessions.contains(&self.session_id) {
            return Err(GatewayError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolSession for SimulatedSession {
    async fn browse(&self, path: Option<&str>) -> Result<Vec<BrowseNode>, GatewayError> {
        let state = self.gateway.state();
        self.ensure_open(&state)?;
        let nodes = match path {
            None => state
                .channels
                .keys()
                .map(|name| BrowseNode {
                    name: name.clone(),
                    path: name.clone(),
                })
                .collect(),
            Some(channel) => state
                .channels
                .get(channel)
                .map(|c| {
                    c.devices
                        .keys()
                        .map(|name| BrowseNode {
                            name: name.clone(),
                            path: format!("{channel}.{name}"),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };
        Ok(nodes)
    }

    async fn create_subscription(
        &self,
        _publishing_interval_ms: u64,
        sink: mpsc::Sender<NotificationBatch>,
    ) -> Result<u32, GatewayError> {
        let subscription_id = self.gateway.next_id();
        let mut state = self.gateway.state();
        self.ensure_open(&state)?;
        state.subscriptions.insert(
            subscription_id,
            SimSubscription {
                session_id: self.session_id,
                sink,
                items: HashMap::new(),
            },
        );
        Ok(subscription_id)
    }

    async fn add_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItem],
    ) -> Result<Vec<u32>, GatewayError> {
        let mut state = self.gateway.state();
        self.ensure_open(&state)?;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| GatewayError::Protocol(format!("subscription {subscription_id}")))?;
        let mut rejected = Vec::new();
        for item in items {
            if item.node_address.trim().is_empty() {
                rejected.push(item.client_handle);
                continue;
            }
            subscription
                .items
                .insert(item.client_handle, item.node_address.clone());
        }
        Ok(rejected)
    }

    async fn remove_monitored_items(
        &self,
        subscription_id: u32,
        client_handles: &[u32],
    ) -> Result<(), GatewayError> {
        let mut state = self.gateway.state();
        self.ensure_open(&state)?;
        if let Some(subscription) = state.subscriptions.get_mut(&subscription_id) {
            for handle in client_handles {
                subscription.items.remove(handle);
            }
        }
        Ok(())
    }

    async fn write_value(
        &self,
        node_address: &str,
        value: &TagValue,
    ) -> Result<(), GatewayError> {
        let mut state = self.gateway.state();
        self.ensure_open(&state)?;
        if state.fail_objects.contains(node_address) {
            return Err(GatewayError::Protocol(format!(
                "write rejected for {node_address}"
            )));
        }
        state.written.push((node_address.to_string(), value.clone()));
        Ok(())
    }

    async fn keep_alive(&self) -> Result<(), GatewayError> {
        let state = self.gateway.state();
        self.ensure_open(&state)?;
        if state.keep_alive_failing {
            return Err(GatewayError::Protocol("server status read failed".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.gateway.state();
        state.open_sessions.remove(&self.session_id);
        let session_id = self.session_id;
        state
            .subscriptions
            .retain(|_, sub| sub.session_id != session_id);
    }
}
