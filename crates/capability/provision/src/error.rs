use domain::{DeviceId, DriverId};
use fleet_gateway::GatewayError;
use fleet_session::SessionError;
use fleet_storage::StorageError;

/// 下发错误。任一步骤失败都会让本次操作以 `P+2` 结束。
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),
    #[error("device {device_id} belongs to driver {actual}, not {expected}")]
    DriverMismatch {
        device_id: DeviceId,
        expected: DriverId,
        actual: DriverId,
    },
    #[error("channel {0} not found")]
    ChannelNotFound(String),
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
}
