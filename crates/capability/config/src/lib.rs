//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
///
/// 驱动端点本身存放在 `drivers` 表中，这里只有进程级参数。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub redis_last_value_ttl_seconds: Option<u64>,
    /// 需要启动的驱动；为空时启动所有启用的驱动。
    pub driver_ids: Vec<i64>,
    /// 协议适配模式，目前支持 `sim`。
    pub protocol_mode: String,
    pub provision_poll_interval_ms: u64,
    pub write_back_poll_interval_ms: u64,
    pub health_interval_ms: u64,
    /// 周期对账间隔；`None` 表示只在启动时对账一次。
    pub reconcile_interval_seconds: Option<u64>,
    pub pipeline_capacity: usize,
    pub pipeline_batch_size: usize,
    pub pipeline_flush_interval_ms: u64,
    pub max_sessions: usize,
    /// 装箱时超出会话上限的设备是否跳过（默认强制分配并记录溢出）。
    pub overflow_skip: bool,
    /// `51`（停用成功）是否视为在线状态。
    pub live_includes_deactivated: bool,
    pub reconcile_channel_batch: usize,
    pub reconcile_device_batch: usize,
    pub reconcile_batch_delay_ms: u64,
    pub provision_tag_batch: usize,
    pub provision_batch_delay_ms: u64,
    pub unsubscribe_settle_ms: u64,
    pub restart_settle_ms: u64,
    pub session_reconnect_delay_ms: u64,
    pub session_keep_alive_interval_ms: u64,
    pub gateway_connect_timeout_ms: u64,
    pub gateway_request_timeout_ms: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("FLEET_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FLEET_DATABASE_URL".to_string()))?;
        let http_addr =
            env::var("FLEET_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8090".to_string());
        let redis_url = read_optional("FLEET_REDIS_URL");
        let redis_last_value_ttl_seconds =
            read_optional_u64("FLEET_REDIS_LAST_VALUE_TTL_SECONDS")?.filter(|value| *value > 0);
        let driver_ids = read_id_list("FLEET_DRIVER_IDS")?;
        let protocol_mode = env::var("FLEET_PROTOCOL").unwrap_or_else(|_| "sim".to_string());
        let provision_poll_interval_ms =
            read_u64_with_default("FLEET_PROVISION_POLL_INTERVAL_MS", 5_000)?;
        let write_back_poll_interval_ms =
            read_u64_with_default("FLEET_WRITE_BACK_POLL_INTERVAL_MS", 1_000)?;
        let health_interval_ms = read_u64_with_default("FLEET_HEALTH_INTERVAL_MS", 30_000)?;
        let reconcile_interval_seconds =
            read_optional_u64("FLEET_RECONCILE_INTERVAL_SECONDS")?.filter(|value| *value > 0);
        let pipeline_capacity = read_usize_with_default("FLEET_PIPELINE_CAPACITY", 50_000)?;
        let pipeline_batch_size = read_usize_with_default("FLEET_PIPELINE_BATCH_SIZE", 5_000)?;
        let pipeline_flush_interval_ms =
            read_u64_with_default("FLEET_PIPELINE_FLUSH_INTERVAL_MS", 500)?;
        let max_sessions = read_usize_with_default("FLEET_MAX_SESSIONS", 10)?;
        let overflow_skip = read_overflow_policy("FLEET_OVERFLOW_POLICY")?;
        let live_includes_deactivated =
            read_bool_with_default("FLEET_LIVE_INCLUDES_DEACTIVATED", true);
        let reconcile_channel_batch =
            read_usize_with_default("FLEET_RECONCILE_CHANNEL_BATCH", 10)?;
        let reconcile_device_batch = read_usize_with_default("FLEET_RECONCILE_DEVICE_BATCH", 5)?;
        let reconcile_batch_delay_ms =
            read_u64_with_default("FLEET_RECONCILE_BATCH_DELAY_MS", 200)?;
        let provision_tag_batch = read_usize_with_default("FLEET_PROVISION_TAG_BATCH", 50)?;
        let provision_batch_delay_ms =
            read_u64_with_default("FLEET_PROVISION_BATCH_DELAY_MS", 100)?;
        let unsubscribe_settle_ms = read_u64_with_default("FLEET_UNSUBSCRIBE_SETTLE_MS", 500)?;
        let restart_settle_ms = read_u64_with_default("FLEET_RESTART_SETTLE_MS", 2_000)?;
        let session_reconnect_delay_ms =
            read_u64_with_default("FLEET_SESSION_RECONNECT_DELAY_MS", 5_000)?;
        let session_keep_alive_interval_ms =
            read_u64_with_default("FLEET_SESSION_KEEP_ALIVE_INTERVAL_MS", 5_000)?;
        let gateway_connect_timeout_ms =
            read_u64_with_default("FLEET_GATEWAY_CONNECT_TIMEOUT_MS", 3_000)?;
        let gateway_request_timeout_ms =
            read_u64_with_default("FLEET_GATEWAY_REQUEST_TIMEOUT_MS", 10_000)?;

        Ok(Self {
            http_addr,
            database_url,
            redis_url,
            redis_last_value_ttl_seconds,
            driver_ids,
            protocol_mode,
            provision_poll_interval_ms,
            write_back_poll_interval_ms,
            health_interval_ms,
            reconcile_interval_seconds,
            pipeline_capacity,
            pipeline_batch_size,
            pipeline_flush_interval_ms,
            max_sessions,
            overflow_skip,
            live_includes_deactivated,
            reconcile_channel_batch,
            reconcile_device_batch,
            reconcile_batch_delay_ms,
            provision_tag_batch,
            provision_batch_delay_ms,
            unsubscribe_settle_ms,
            restart_settle_ms,
            session_reconnect_delay_ms,
            session_keep_alive_interval_ms,
            gateway_connect_timeout_ms,
            gateway_request_timeout_ms,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

/// 逗号分隔的驱动 ID 列表。
fn read_id_list(key: &str) -> Result<Vec<i64>, ConfigError> {
    let Some(value) = read_optional(key) else {
        return Ok(Vec::new());
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<i64>()
                .map_err(|_| ConfigError::Invalid(key.to_string(), value.clone()))
        })
        .collect()
}

/// `force`（默认）或 `skip`。
fn read_overflow_policy(key: &str) -> Result<bool, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(false),
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "" | "force" => Ok(false),
            "skip" => Ok(true),
            _ => Err(ConfigError::Invalid(key.to_string(), value)),
        },
    }
}
