//! Postgres 写入请求存储

use crate::error::StorageError;
use crate::models::WriteOutcome;
use crate::traits::WriteRequestStore;
use crate::validation::ensure_driver_id;
use domain::{DriverId, WriteRequest};
use sqlx::{PgPool, Row};

pub struct PgWriteRequestStore {
    pub pool: PgPool,
}

impl PgWriteRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WriteRequestStore for PgWriteRequestStore {
    async fn list_pending_writes(
        &self,
        driver_id: DriverId,
        limit: usize,
    ) -> Result<Vec<WriteRequest>, StorageError> {
        ensure_driver_id(driver_id)?;
        let rows = sqlx::query(
            "select id, driver_id, device_id, tag_name, value from write_requests \
             where driver_id = $1 and status = 'pending' order by id limit $2",
        )
        .bind(driver_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(WriteRequest {
                id: row.try_get("id")?,
                driver_id: row.try_get("driver_id")?,
                device_id: row.try_get("device_id")?,
                tag_name: row.try_get("tag_name")?,
                value: row.try_get("value")?,
            });
        }
        Ok(items)
    }

    async fn complete_write(&self, id: i64, outcome: &WriteOutcome) -> Result<(), StorageError> {
        let result = sqlx::query(
            "update write_requests set status = $2, error = $3, completed_at = now() \
             where id = $1",
        )
        .bind(id)
        .bind(outcome.status())
        .bind(outcome.error())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::new(format!("write request {id} not found")));
        }
        Ok(())
    }
}
