use domain::DriverId;
use fleet_gateway::GatewayError;
use fleet_pipeline::PipelineError;
use fleet_reconcile::ReconcileError;
use fleet_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("driver {0} not found")]
    DriverNotFound(DriverId),
    #[error("driver {0} is disabled")]
    DriverDisabled(DriverId),
    #[error("driver {0} is already running")]
    AlreadyRunning(DriverId),
    #[error("driver {0} is not running")]
    NotRunning(DriverId),
    #[error("startup reconcile failed: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}
