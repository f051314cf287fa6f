//! Postgres 驱动配置存储

use crate::error::StorageError;
use crate::traits::DriverStore;
use crate::validation::ensure_driver_id;
use domain::{DriverConfig, DriverId, SecurityMode};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgDriverStore {
    pub pool: PgPool,
}

impl PgDriverStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DRIVER_COLUMNS: &str = "driver_id, name, endpoint_url, security_mode, username, password, \
     max_tags_per_session, publishing_interval_ms, namespace_prefix, address_template, \
     config_api_url, config_api_username, config_api_password, enabled";

fn driver_from_row(row: &PgRow) -> Result<DriverConfig, StorageError> {
    let security_mode: String = row.try_get("security_mode")?;
    let security_mode = SecurityMode::parse(&security_mode)
        .ok_or_else(|| StorageError::new(format!("invalid security mode: {security_mode}")))?;
    let max_tags: i32 = row.try_get("max_tags_per_session")?;
    let publishing_interval_ms: i64 = row.try_get("publishing_interval_ms")?;
    Ok(DriverConfig {
        driver_id: row.try_get("driver_id")?,
        name: row.try_get("name")?,
        endpoint_url: row.try_get("endpoint_url")?,
        security_mode,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        max_tags_per_session: max_tags.max(1) as usize,
        publishing_interval_ms: publishing_interval_ms.max(0) as u64,
        namespace_prefix: row.try_get("namespace_prefix")?,
        address_template: row.try_get("address_template")?,
        config_api_url: row.try_get("config_api_url")?,
        config_api_username: row.try_get("config_api_username")?,
        config_api_password: row.try_get("config_api_password")?,
        enabled: row.try_get("enabled")?,
    })
}

#[async_trait::async_trait]
impl DriverStore for PgDriverStore {
    async fn list_drivers(&self) -> Result<Vec<DriverConfig>, StorageError> {
        let sql = format!("select {DRIVER_COLUMNS} from drivers order by driver_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(driver_from_row).collect()
    }

    async fn find_driver(
        &self,
        driver_id: DriverId,
    ) -> Result<Option<DriverConfig>, StorageError> {
        ensure_driver_id(driver_id)?;
        let sql = format!("select {DRIVER_COLUMNS} from drivers where driver_id = $1");
        let row = sqlx::query(&sql)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(driver_from_row).transpose()
    }
}
