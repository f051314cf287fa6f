use domain::DriverId;
use fleet_gateway::GatewayError;
use fleet_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("driver {0} not found")]
    DriverNotFound(DriverId),
    #[error("cannot establish browse session: {0}")]
    Connect(GatewayError),
    #[error("browse failed: {0}")]
    Browse(GatewayError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
