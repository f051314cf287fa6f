//! 单个协议会话
//!
//! 每个会话由一个监督任务驱动：连接 -> 创建订阅 -> 添加监控项 -> 服务循环。
//! 服务循环同时处理数据变化通知、保活探测与外部命令（写值、取消设备订阅）。
//! 连接失败或保活失败后进入固定延迟的重连，重连成功后重新订阅同一组标签。

use crate::error::SessionError;
use domain::{Device, DeviceId, DriverConfig, SessionId, Tag, TagValue, now_epoch_ms};
use fleet_gateway::{MonitoredItem, NotificationBatch, ProtocolConnector, ProtocolSession};
use fleet_normalize::{DropReason, to_sample};
use fleet_pipeline::PipelineHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 会话连接状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error(String),
    /// 仅在显式停止后进入。
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Error(_) => "error",
            SessionState::Stopped => "stopped",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

/// 会话监控的一个标签。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredTag {
    pub device_id: DeviceId,
    pub tag_name: String,
    pub node_address: String,
}

impl MonitoredTag {
    /// 按驱动地址模板生成设备全部标签的监控项。
    pub fn for_device(driver: &DriverConfig, device: &Device, tags: &[Tag]) -> Vec<MonitoredTag> {
        tags.iter()
            .map(|tag| MonitoredTag {
                device_id: device.id,
                tag_name: tag.name.clone(),
                node_address: driver.node_address(&device.channel_name, &device.name, &tag.name),
            })
            .collect()
    }
}

/// 会话参数。
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reconnect_delay: Duration,
    pub keep_alive_interval: Duration,
    /// 协议回调 -> 监督任务之间的通知批次缓冲。
    pub notification_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(5),
            notification_buffer: 1_024,
        }
    }
}

/// 会话计数快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// 转发到流水线的 Good 质量通知数。
    pub messages_received: u64,
    pub dropped: u64,
    pub reconnects: u64,
    /// 当前生效的监控项数。
    pub tag_count: usize,
}

#[derive(Default)]
struct Counters {
    messages_received: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,
    tag_count: AtomicUsize,
}

enum Command {
    Write {
        node_address: String,
        value: TagValue,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Unsubscribe {
        device_id: DeviceId,
        reply: oneshot::Sender<Result<usize, SessionError>>,
    },
}

/// 协议会话句柄。
pub struct Session {
    id: SessionId,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// 启动监督任务。首次连接失败不会返回错误，而是进入重连循环。
    pub fn start(
        id: SessionId,
        driver: Arc<DriverConfig>,
        connector: Arc<dyn ProtocolConnector>,
        tags: Vec<MonitoredTag>,
        sink: PipelineHandle,
        config: SessionConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let counters = Arc::new(Counters::default());
        counters.tag_count.store(tags.len(), Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor {
            id,
            driver,
            connector,
            tags,
            sink,
            config,
            commands: command_rx,
            state: state_tx,
            counters: counters.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run());
        Self {
            id,
            commands: command_tx,
            state: state_rx,
            counters,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// 订阅状态变化。
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            tag_count: self.counters.tag_count.load(Ordering::Relaxed),
        }
    }

    /// 写一次值，不重试。
    pub async fn write_tag(&self, node_address: &str, value: TagValue) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Write {
                node_address: node_address.to_string(),
                value,
                reply,
            })
            .await
            .map_err(|_| SessionError::Stopped)?;
        response.await.map_err(|_| SessionError::Stopped)?
    }

    /// 移除设备的全部监控项，移除完成后返回移除数量。
    pub async fn unsubscribe_device(&self, device_id: DeviceId) -> Result<usize, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Unsubscribe { device_id, reply })
            .await
            .map_err(|_| SessionError::Stopped)?;
        response.await.map_err(|_| SessionError::Stopped)?
    }

    /// 停止会话：尽力取消订阅并关闭连接。重复调用无副作用。
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(
                    target: "fleet.session",
                    session_id = self.id,
                    error = %err,
                    "session_task_failed"
                );
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Active {
    session: Arc<dyn ProtocolSession>,
    subscription_id: u32,
    notifications: mpsc::Receiver<NotificationBatch>,
    handles: HashMap<u32, MonitoredTag>,
}

enum Exit {
    Stopped,
    Lost(String),
}

struct Supervisor {
    id: SessionId,
    driver: Arc<DriverConfig>,
    connector: Arc<dyn ProtocolConnector>,
    tags: Vec<MonitoredTag>,
    sink: PipelineHandle,
    config: SessionConfig,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<SessionState>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let mut first_attempt = true;
        loop {
            self.set_state(if first_attempt {
                SessionState::Connecting
            } else {
                SessionState::Reconnecting
            });
            first_attempt = false;

            match self.connect().await {
                Ok(mut active) => {
                    self.set_state(SessionState::Connected);
                    tracing::info!(
                        target: "fleet.session",
                        driver_id = self.driver.driver_id,
                        session_id = self.id,
                        monitored = active.handles.len(),
                        "session_connected"
                    );
                    match self.serve(&mut active).await {
                        Exit::Stopped => {
                            Self::release(&active).await;
                            break;
                        }
                        Exit::Lost(reason) => {
                            tracing::warn!(
                                target: "fleet.session",
                                driver_id = self.driver.driver_id,
                                session_id = self.id,
                                reason = %reason,
                                "session_lost"
                            );
                            active.session.close().await;
                            self.set_state(SessionState::Error(reason));
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        target: "fleet.session",
                        driver_id = self.driver.driver_id,
                        session_id = self.id,
                        error = %err,
                        "session_connect_failed"
                    );
                    self.set_state(SessionState::Error(err.to_string()));
                }
            }

            if !self.wait_reconnect().await {
                break;
            }
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            fleet_telemetry::record_session_reconnect();
        }
        self.set_state(SessionState::Stopped);
        tracing::info!(
            target: "fleet.session",
            driver_id = self.driver.driver_id,
            session_id = self.id,
            "session_stopped"
        );
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    async fn connect(&mut self) -> Result<Active, SessionError> {
        let session = self.connector.connect(&self.driver).await?;
        match self.subscribe(session.clone()).await {
            Ok(active) => Ok(active),
            Err(err) => {
                session.close().await;
                Err(err)
            }
        }
    }

    async fn subscribe(&mut self, session: Arc<dyn ProtocolSession>) -> Result<Active, SessionError> {
        let (sink, notifications) = mpsc::channel(self.config.notification_buffer.max(1));
        let subscription_id = session
            .create_subscription(self.driver.publishing_interval_ms, sink)
            .await?;

        let mut handles = HashMap::with_capacity(self.tags.len());
        let mut items = Vec::with_capacity(self.tags.len());
        for (index, tag) in self.tags.iter().enumerate() {
            let client_handle = index as u32 + 1;
            handles.insert(client_handle, tag.clone());
            items.push(MonitoredItem {
                client_handle,
                node_address: tag.node_address.clone(),
            });
        }
        if !items.is_empty() {
            let rejected = session.add_monitored_items(subscription_id, &items).await?;
            for handle in rejected {
                if let Some(tag) = handles.remove(&handle) {
                    tracing::warn!(
                        target: "fleet.session",
                        session_id = self.id,
                        device_id = tag.device_id,
                        node_address = %tag.node_address,
                        "monitored_item_rejected"
                    );
                }
            }
        }
        self.counters.tag_count.store(handles.len(), Ordering::Relaxed);
        Ok(Active {
            session,
            subscription_id,
            notifications,
            handles,
        })
    }

    async fn serve(&mut self, active: &mut Active) -> Exit {
        let period = self.config.keep_alive_interval.max(Duration::from_millis(1));
        let mut keep_alive = tokio::time::interval_at(Instant::now() + period, period);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Exit::Stopped,
                batch = active.notifications.recv() => match batch {
                    Some(batch) => self.forward(&active.handles, batch).await,
                    None => return Exit::Lost("notification channel closed".to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_connected(active, command).await,
                    None => return Exit::Stopped,
                },
                _ = keep_alive.tick() => {
                    if let Err(err) = active.session.keep_alive().await {
                        return Exit::Lost(err.to_string());
                    }
                }
            }
        }
    }

    /// Good 质量通知按到达顺序转发；其余计为丢弃。
    async fn forward(&self, handles: &HashMap<u32, MonitoredTag>, batch: NotificationBatch) {
        let received_at = now_epoch_ms();
        let mut samples = Vec::with_capacity(batch.len());
        for item in batch {
            let Some(tag) = handles.get(&item.client_handle) else {
                continue;
            };
            match to_sample(&item.notification, tag.device_id, &tag.tag_name, received_at) {
                Ok(sample) => samples.push(sample),
                Err(reason) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    match reason {
                        DropReason::NotGood(_) => fleet_telemetry::record_dropped_bad_quality(),
                        DropReason::NullValue => fleet_telemetry::record_dropped_invalid(1),
                    }
                }
            }
        }
        if samples.is_empty() {
            return;
        }
        let count = samples.len() as u64;
        self.counters
            .messages_received
            .fetch_add(count, Ordering::Relaxed);
        fleet_telemetry::record_notifications(count);
        if let Err(err) = self.sink.enqueue(samples).await {
            tracing::warn!(
                target: "fleet.session",
                session_id = self.id,
                error = %err,
                samples = count,
                "samples_rejected"
            );
        }
    }

    async fn handle_connected(&mut self, active: &mut Active, command: Command) {
        match command {
            Command::Write {
                node_address,
                value,
                reply,
            } => {
                let result = active
                    .session
                    .write_value(&node_address, &value)
                    .await
                    .map_err(SessionError::from);
                let _ = reply.send(result);
            }
            Command::Unsubscribe { device_id, reply } => {
                self.tags.retain(|tag| tag.device_id != device_id);
                let handles: Vec<u32> = active
                    .handles
                    .iter()
                    .filter(|(_, tag)| tag.device_id == device_id)
                    .map(|(handle, _)| *handle)
                    .collect();
                for handle in &handles {
                    active.handles.remove(handle);
                }
                self.counters
                    .tag_count
                    .store(active.handles.len(), Ordering::Relaxed);
                let result = if handles.is_empty() {
                    Ok(0)
                } else {
                    active
                        .session
                        .remove_monitored_items(active.subscription_id, &handles)
                        .await
                        .map(|()| handles.len())
                        .map_err(SessionError::from)
                };
                tracing::debug!(
                    target: "fleet.session",
                    session_id = self.id,
                    device_id,
                    removed = handles.len(),
                    "device_unsubscribed"
                );
                let _ = reply.send(result);
            }
        }
    }

    fn handle_disconnected(&mut self, command: Command) {
        match command {
            Command::Write { reply, .. } => {
                let _ = reply.send(Err(SessionError::NotConnected));
            }
            Command::Unsubscribe { device_id, reply } => {
                let before = self.tags.len();
                self.tags.retain(|tag| tag.device_id != device_id);
                self.counters.tag_count.store(self.tags.len(), Ordering::Relaxed);
                let _ = reply.send(Ok(before - self.tags.len()));
            }
        }
    }

    /// 等待重连延迟，期间继续应答命令。返回 `false` 表示已停止。
    async fn wait_reconnect(&mut self) -> bool {
        let deadline = Instant::now() + self.config.reconnect_delay;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_disconnected(command),
                    None => return false,
                },
            }
        }
    }

    async fn release(active: &Active) {
        let handles: Vec<u32> = active.handles.keys().copied().collect();
        if !handles.is_empty() {
            if let Err(err) = active
                .session
                .remove_monitored_items(active.subscription_id, &handles)
                .await
            {
                tracing::debug!(
                    target: "fleet.session",
                    error = %err,
                    "unsubscribe_on_stop_failed"
                );
            }
        }
        active.session.close().await;
    }
}
