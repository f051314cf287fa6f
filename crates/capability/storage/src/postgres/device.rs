//! Postgres 设备与通道存储

use crate::error::StorageError;
use crate::models::SessionAssignment;
use crate::traits::DeviceStore;
use crate::validation::{ensure_driver_id, ensure_status_code};
use domain::{Channel, Device, DeviceId, DriverId, SessionId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

pub struct PgDeviceStore {
    pub pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DEVICE_COLUMNS: &str =
    "device_id, driver_id, channel_name, name, device_type_id, definition, status, session_id";

fn device_from_row(row: &PgRow) -> Result<Device, StorageError> {
    Ok(Device {
        id: row.try_get("device_id")?,
        driver_id: row.try_get("driver_id")?,
        channel_name: row.try_get("channel_name")?,
        name: row.try_get("name")?,
        device_type_id: row.try_get("device_type_id")?,
        definition: row.try_get("definition")?,
        status: row.try_get("status")?,
        session_id: row.try_get("session_id")?,
    })
}

fn channel_from_row(row: &PgRow) -> Result<Channel, StorageError> {
    Ok(Channel {
        driver_id: row.try_get("driver_id")?,
        name: row.try_get("name")?,
        definition: row.try_get("definition")?,
    })
}

fn expect_one(rows_affected: u64, device_id: DeviceId) -> Result<(), StorageError> {
    if rows_affected == 0 {
        return Err(StorageError::new(format!("device {device_id} not found")));
    }
    Ok(())
}

#[async_trait::async_trait]
impl DeviceStore for PgDeviceStore {
    async fn list_pending_devices(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<Device>, StorageError> {
        ensure_driver_id(driver_id)?;
        let sql = format!(
            "select {DEVICE_COLUMNS} from devices \
             where driver_id = $1 and status in (10, 20, 30, 40, 50, 60) \
             order by device_id"
        );
        let rows = sqlx::query(&sql)
            .bind(driver_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn list_devices_by_status(
        &self,
        driver_id: DriverId,
        codes: &[i32],
    ) -> Result<Vec<Device>, StorageError> {
        ensure_driver_id(driver_id)?;
        for code in codes {
            ensure_status_code(*code)?;
        }
        let sql = format!(
            "select {DEVICE_COLUMNS} from devices \
             where driver_id = $1 and status = any($2) \
             order by device_id"
        );
        let rows = sqlx::query(&sql)
            .bind(driver_id)
            .bind(codes)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn find_device(&self, device_id: DeviceId) -> Result<Option<Device>, StorageError> {
        let sql = format!("select {DEVICE_COLUMNS} from devices where device_id = $1");
        let row = sqlx::query(&sql)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn update_device_status(
        &self,
        device_id: DeviceId,
        code: i32,
    ) -> Result<(), StorageError> {
        let status = ensure_status_code(code)?;
        let result = sqlx::query(
            "update devices set status = $2, updated_at = now() where device_id = $1",
        )
        .bind(device_id)
        .bind(status.code())
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), device_id)
    }

    async fn update_device_definition(
        &self,
        device_id: DeviceId,
        definition: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "update devices set definition = $2, updated_at = now() where device_id = $1",
        )
        .bind(device_id)
        .bind(definition)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), device_id)
    }

    async fn assign_session(
        &self,
        device_id: DeviceId,
        session_id: Option<SessionId>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("update devices set session_id = $2 where device_id = $1")
            .bind(device_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), device_id)
    }

    async fn save_assignments(
        &self,
        assignments: &[SessionAssignment],
    ) -> Result<usize, StorageError> {
        if assignments.is_empty() {
            return Ok(0);
        }
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("update devices set session_id = a.session_id from (");
        builder.push_values(assignments, |mut row, assignment| {
            row.push_bind(assignment.device_id)
                .push_bind(assignment.session_id);
        });
        builder.push(") as a(device_id, session_id) where devices.device_id = a.device_id");
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_assignments(
        &self,
        driver_id: DriverId,
    ) -> Result<Vec<SessionAssignment>, StorageError> {
        ensure_driver_id(driver_id)?;
        let rows = sqlx::query(
            "select device_id, session_id from devices \
             where driver_id = $1 and session_id is not null order by device_id",
        )
        .bind(driver_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(SessionAssignment {
                device_id: row.try_get("device_id")?,
                session_id: row.try_get("session_id")?,
            });
        }
        Ok(items)
    }

    async fn find_channel(
        &self,
        driver_id: DriverId,
        name: &str,
    ) -> Result<Option<Channel>, StorageError> {
        let row = sqlx::query(
            "select driver_id, name, definition from channels where driver_id = $1 and name = $2",
        )
        .bind(driver_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    async fn list_channels(&self, driver_id: DriverId) -> Result<Vec<Channel>, StorageError> {
        ensure_driver_id(driver_id)?;
        let rows = sqlx::query(
            "select driver_id, name, definition from channels where driver_id = $1 order by name",
        )
        .bind(driver_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(channel_from_row).collect()
    }

    async fn count_channel_devices(
        &self,
        driver_id: DriverId,
        channel_name: &str,
        exclude: DeviceId,
    ) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "select count(*) from devices \
             where driver_id = $1 and channel_name = $2 and device_id <> $3 and status <> 21",
        )
        .bind(driver_id)
        .bind(channel_name)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }
}
