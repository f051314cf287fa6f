//! 网关错误类型定义

/// 网关配置接口与协议会话的错误
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 对象已存在（创建类调用随后就地更新）
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// 对象不存在（删除类调用按成功处理）
    #[error("not found: {0}")]
    NotFound(String),

    /// 网络或连接错误
    #[error("transport error: {0}")]
    Transport(String),

    /// 网关拒绝请求
    #[error("rejected by gateway ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// JSON 定义缺少必要字段
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// 会话未连接或已关闭
    #[error("session not connected")]
    NotConnected,

    /// 协议层操作失败（写入、订阅、保活）
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}
