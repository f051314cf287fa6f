//! 数据库连接管理

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// 默认最大连接数；并发下发与批量写入共用同一连接池。
pub const DEFAULT_MAX_CONNECTIONS: u32 = 16;

/// 建立 Postgres 连接池
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    connect_pool_with(database_url, DEFAULT_MAX_CONNECTIONS).await
}

/// 按指定最大连接数建立连接池。
pub async fn connect_pool_with(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await?;
    Ok(pool)
}
