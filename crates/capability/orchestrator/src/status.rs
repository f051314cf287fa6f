use domain::{DeviceId, DriverId};
use fleet_pipeline::PipelineStatsSnapshot;
use fleet_reconcile::SyncReport;
use fleet_session::SessionStatus;

/// 单个驱动的运行状态。
#[derive(Debug, Clone)]
pub struct DriverStatus {
    pub driver_id: DriverId,
    pub name: String,
    pub sessions: Vec<SessionStatus>,
    pub pipeline: PipelineStatsSnapshot,
    /// 当前持有操作锁的设备数。
    pub operations_in_flight: usize,
    /// 启动时分配计算出的会话需求（未受上限约束）。
    pub required_sessions: usize,
    pub overflowed: Vec<DeviceId>,
    pub unassigned: Vec<DeviceId>,
    pub last_sync: Option<SyncReport>,
}

impl DriverStatus {
    pub fn connected_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|session| session.state.is_connected())
            .count()
    }
}
