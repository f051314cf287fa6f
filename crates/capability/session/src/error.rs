use fleet_gateway::GatewayError;

/// 会话错误。
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(i32),
    #[error("session is not connected")]
    NotConnected,
    #[error("session stopped")]
    Stopped,
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
