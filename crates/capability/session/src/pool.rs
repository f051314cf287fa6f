//! 会话池与标签分配
//!
//! [`plan`] 是纯函数：按单会话标签上限计算需要的会话数，再按标签数降序贪心装箱，
//! 每台设备放入当前负载最小的会话。[`SessionPool`] 持有运行中的会话与设备 -> 会话分配表。

use crate::error::SessionError;
use crate::session::{MonitoredTag, Session, SessionConfig, SessionState, SessionStats};
use dashmap::DashMap;
use domain::{DeviceId, DriverConfig, SessionId};
use fleet_gateway::ProtocolConnector;
use fleet_pipeline::PipelineHandle;
use fleet_storage::SessionAssignment;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 会话数达到上限后仍放不下时的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// 仍然分配到负载最小的会话，并记录溢出。
    #[default]
    ForceAssign,
    /// 不分配，设备保持未分配状态。
    Skip,
}

/// 参与分配的设备及其有效标签数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLoad {
    pub device_id: DeviceId,
    pub tag_count: usize,
    pub current_session: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLoad {
    pub session_id: SessionId,
    pub devices: Vec<DeviceLoad>,
    pub tag_count: usize,
}

impl SessionLoad {
    fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            devices: Vec::new(),
            tag_count: 0,
        }
    }
}

/// 分配结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionPlan {
    pub total_tags: usize,
    /// 未受会话上限约束时需要的会话数。
    pub required_sessions: usize,
    /// 按会话 ID 升序。
    pub sessions: Vec<SessionLoad>,
    /// `Skip` 策略下未分配的设备。
    pub unassigned: Vec<DeviceId>,
    /// `ForceAssign` 策略下超出会话上限的设备。
    pub overflowed: Vec<DeviceId>,
    pub capacity_warning: bool,
}

impl DistributionPlan {
    pub fn assignments(&self) -> Vec<SessionAssignment> {
        self.sessions
            .iter()
            .flat_map(|session| {
                session.devices.iter().map(move |device| SessionAssignment {
                    device_id: device.device_id,
                    session_id: session.session_id,
                })
            })
            .collect()
    }

    pub fn session_of(&self, device_id: DeviceId) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|session| session.devices.iter().any(|d| d.device_id == device_id))
            .map(|session| session.session_id)
    }

    pub fn assigned_tags(&self) -> usize {
        self.sessions.iter().map(|session| session.tag_count).sum()
    }
}

/// 计算设备 -> 会话分配。
///
/// - 需要的会话数 = ceil(总标签数 / 单会话上限)，有设备时至少 1，超过 `max_sessions` 时告警并取上限
/// - 设备按标签数降序（同数按 ID 升序）逐个放入负载最小的会话（同负载取较小会话 ID）
/// - 负载最小的会话也放不下时，只要未达 `max_sessions` 就新开会话；达到上限后才按 `policy` 处理
/// - `is_locked` 为真且已有分配的设备保持原会话不动
pub fn plan(
    devices: &[DeviceLoad],
    max_tags_per_session: usize,
    max_sessions: usize,
    policy: OverflowPolicy,
    is_locked: &dyn Fn(DeviceId) -> bool,
) -> DistributionPlan {
    if devices.is_empty() {
        return DistributionPlan::default();
    }
    let ceiling = max_tags_per_session.max(1);
    let max_sessions = max_sessions.max(1);
    let total_tags: usize = devices.iter().map(|d| d.tag_count).sum();
    let required_sessions = total_tags.div_ceil(ceiling).max(1);
    let capacity_warning = required_sessions > max_sessions;
    if capacity_warning {
        tracing::warn!(
            target: "fleet.session",
            total_tags,
            required_sessions,
            max_sessions,
            max_tags_per_session = ceiling,
            "session_capacity_exceeded"
        );
    }
    let mut count = required_sessions.min(max_sessions) as SessionId;

    let mut sessions: BTreeMap<SessionId, SessionLoad> =
        (1..=count).map(|id| (id, SessionLoad::empty(id))).collect();
    let mut pending = Vec::with_capacity(devices.len());
    for device in devices {
        match device.current_session {
            Some(session_id) if is_locked(device.device_id) => {
                let load = sessions
                    .entry(session_id)
                    .or_insert_with(|| SessionLoad::empty(session_id));
                load.devices.push(*device);
                load.tag_count += device.tag_count;
            }
            _ => pending.push(*device),
        }
    }
    pending.sort_by(|a, b| {
        b.tag_count
            .cmp(&a.tag_count)
            .then(a.device_id.cmp(&b.device_id))
    });

    let mut unassigned = Vec::new();
    let mut overflowed = Vec::new();
    for device in pending {
        // 放不下且仍有会话预算时先开新会话，预算用尽才按策略处理
        let target_id = loop {
            let candidate = sessions
                .values()
                .filter(|session| session.session_id >= 1 && session.session_id <= count)
                .min_by_key(|session| (session.tag_count, session.session_id))
                .map(|session| (session.session_id, session.tag_count));
            let fits = candidate.is_some_and(|(_, load)| load + device.tag_count <= ceiling);
            if fits || device.tag_count > ceiling || count as usize >= max_sessions {
                break candidate.map(|(session_id, _)| session_id);
            }
            count += 1;
            sessions
                .entry(count)
                .or_insert_with(|| SessionLoad::empty(count));
        };
        let Some(target) = target_id.and_then(|id| sessions.get_mut(&id)) else {
            unassigned.push(device.device_id);
            continue;
        };
        if target.tag_count + device.tag_count > ceiling {
            match policy {
                OverflowPolicy::ForceAssign => overflowed.push(device.device_id),
                OverflowPolicy::Skip => {
                    unassigned.push(device.device_id);
                    continue;
                }
            }
        }
        target.devices.push(device);
        target.tag_count += device.tag_count;
    }

    if !overflowed.is_empty() || !unassigned.is_empty() {
        tracing::warn!(
            target: "fleet.session",
            overflowed = overflowed.len(),
            unassigned = unassigned.len(),
            policy = ?policy,
            "session_overflow"
        );
    }

    DistributionPlan {
        total_tags,
        required_sessions,
        sessions: sessions.into_values().collect(),
        unassigned,
        overflowed,
        capacity_warning,
    }
}

/// 会话状态视图。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub stats: SessionStats,
    pub assigned_devices: usize,
}

/// 运行期单台设备的会话选择结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Assigned(SessionId),
    /// 会话数已达上限，`ForceAssign` 下超出单会话上限分配。
    Overflowed(SessionId),
    /// 会话数已达上限，`Skip` 下不分配。
    Unassigned,
}

impl Placement {
    pub fn session_id(self) -> Option<SessionId> {
        match self {
            Placement::Assigned(session_id) | Placement::Overflowed(session_id) => Some(session_id),
            Placement::Unassigned => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Assignment {
    session_id: SessionId,
    tag_count: usize,
}

/// 单个驱动的会话池。
pub struct SessionPool {
    driver: Arc<DriverConfig>,
    connector: Arc<dyn ProtocolConnector>,
    sink: PipelineHandle,
    config: SessionConfig,
    max_sessions: usize,
    policy: OverflowPolicy,
    sessions: DashMap<SessionId, Arc<Session>>,
    assignments: DashMap<DeviceId, Assignment>,
}

impl SessionPool {
    pub fn new(
        driver: Arc<DriverConfig>,
        connector: Arc<dyn ProtocolConnector>,
        sink: PipelineHandle,
        config: SessionConfig,
    ) -> Self {
        Self {
            driver,
            connector,
            sink,
            config,
            max_sessions: 10,
            policy: OverflowPolicy::default(),
            sessions: DashMap::new(),
            assignments: DashMap::new(),
        }
    }

    /// 运行期分配使用的会话上限与溢出策略，与 [`plan`] 保持一致。
    pub fn with_limits(mut self, max_sessions: usize, policy: OverflowPolicy) -> Self {
        self.max_sessions = max_sessions.max(1);
        self.policy = policy;
        self
    }

    pub fn driver(&self) -> &DriverConfig {
        &self.driver
    }

    /// 用分配结果替换当前分配表。
    pub fn apply_plan(&self, plan: &DistributionPlan) {
        self.assignments.clear();
        for session in &plan.sessions {
            for device in &session.devices {
                self.assign(device.device_id, session.session_id, device.tag_count);
            }
        }
    }

    pub fn assign(&self, device_id: DeviceId, session_id: SessionId, tag_count: usize) {
        self.assignments.insert(
            device_id,
            Assignment {
                session_id,
                tag_count,
            },
        );
    }

    pub fn release(&self, device_id: DeviceId) -> Option<SessionId> {
        self.assignments
            .remove(&device_id)
            .map(|(_, assignment)| assignment.session_id)
    }

    pub fn session_of(&self, device_id: DeviceId) -> Option<SessionId> {
        self.assignments
            .get(&device_id)
            .map(|assignment| assignment.session_id)
    }

    /// 分配到该会话的设备（按 ID 升序）。
    pub fn devices_of(&self, session_id: SessionId) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .assignments
            .iter()
            .filter(|entry| entry.value().session_id == session_id)
            .map(|entry| *entry.key())
            .collect();
        devices.sort_unstable();
        devices
    }

    /// 为运行期新增的设备选择会话，规则同 [`plan`]：
    /// 负载最小的会话放得下就用它，否则在会话数未达上限时开新会话，再否则按溢出策略处理。
    /// 设备自身已有的分配不计入负载。
    pub fn place(&self, device_id: DeviceId, tag_count: usize) -> Placement {
        let ceiling = self.driver.max_tags_per_session.max(1);
        let mut loads: BTreeMap<SessionId, usize> =
            self.sessions.iter().map(|entry| (*entry.key(), 0)).collect();
        for entry in self.assignments.iter() {
            if *entry.key() == device_id {
                continue;
            }
            *loads.entry(entry.value().session_id).or_default() += entry.value().tag_count;
        }
        let (session_id, load) = loads
            .iter()
            .min_by_key(|(session_id, load)| (**load, **session_id))
            .map(|(session_id, load)| (*session_id, *load))
            .unwrap_or((1, 0));
        if load + tag_count <= ceiling {
            return Placement::Assigned(session_id);
        }
        if tag_count <= ceiling && loads.len() < self.max_sessions {
            let next = loads.keys().next_back().map_or(1, |last| last + 1);
            return Placement::Assigned(next);
        }
        tracing::warn!(
            target: "fleet.session",
            driver_id = self.driver.driver_id,
            device_id,
            tag_count,
            sessions = loads.len(),
            max_sessions = self.max_sessions,
            max_tags_per_session = ceiling,
            policy = ?self.policy,
            "session_capacity_exceeded"
        );
        match self.policy {
            OverflowPolicy::ForceAssign => Placement::Overflowed(session_id),
            OverflowPolicy::Skip => Placement::Unassigned,
        }
    }

    pub fn session(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn session_for_device(&self, device_id: DeviceId) -> Option<Arc<Session>> {
        self.session_of(device_id)
            .and_then(|session_id| self.session(session_id))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 启动会话；同 ID 的旧会话先停止。
    pub async fn start_session(
        &self,
        session_id: SessionId,
        tags: Vec<MonitoredTag>,
    ) -> Arc<Session> {
        let previous = self.sessions.remove(&session_id).map(|(_, session)| session);
        if let Some(previous) = previous {
            previous.stop().await;
        }
        let tag_count = tags.len();
        let session = Arc::new(Session::start(
            session_id,
            self.driver.clone(),
            self.connector.clone(),
            tags,
            self.sink.clone(),
            self.config.clone(),
        ));
        self.sessions.insert(session_id, session.clone());
        tracing::info!(
            target: "fleet.session",
            driver_id = self.driver.driver_id,
            session_id,
            tags = tag_count,
            "session_started"
        );
        session
    }

    /// 以新的标签集合重启会话；未知 ID 直接创建。
    pub async fn restart_session(
        &self,
        session_id: SessionId,
        tags: Vec<MonitoredTag>,
    ) -> Arc<Session> {
        fleet_telemetry::record_session_restart();
        tracing::info!(
            target: "fleet.session",
            driver_id = self.driver.driver_id,
            session_id,
            existed = self.sessions.contains_key(&session_id),
            "session_restart"
        );
        self.start_session(session_id, tags).await
    }

    /// 从设备所在会话取消订阅；设备未分配或会话不存在时返回 0。
    pub async fn unsubscribe_device(&self, device_id: DeviceId) -> Result<usize, SessionError> {
        let Some(session) = self.session_for_device(device_id) else {
            return Ok(0);
        };
        session.unsubscribe_device(device_id).await
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> = self
            .sessions
            .iter()
            .map(|entry| {
                let session_id = *entry.key();
                let session = entry.value();
                SessionStatus {
                    session_id,
                    state: session.state(),
                    stats: session.stats(),
                    assigned_devices: self
                        .assignments
                        .iter()
                        .filter(|a| a.value().session_id == session_id)
                        .count(),
                }
            })
            .collect();
        statuses.sort_by_key(|status| status.session_id);
        statuses
    }

    pub async fn stop_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.sessions.clear();
        for session in sessions {
            session.stop().await;
        }
    }
}
