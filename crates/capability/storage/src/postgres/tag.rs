//! Postgres 标签存储

use crate::error::StorageError;
use crate::traits::TagStore;
use domain::{DeviceId, Tag, TagScope};
use sqlx::{PgPool, Row};

pub struct PgTagStore {
    pub pool: PgPool,
}

impl PgTagStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TagStore for PgTagStore {
    async fn list_type_tags(&self, device_type_id: i64) -> Result<Vec<Tag>, StorageError> {
        let rows = sqlx::query(
            "select name, definition from type_tags where device_type_id = $1 order by tag_id",
        )
        .bind(device_type_id)
        .fetch_all(&self.pool)
        .await?;
        let mut tags = Vec::with_capacity(rows.len());
        for row in rows {
            tags.push(Tag {
                name: row.try_get("name")?,
                definition: row.try_get("definition")?,
                scope: TagScope::Type,
            });
        }
        Ok(tags)
    }

    async fn list_device_tags(&self, device_id: DeviceId) -> Result<Vec<Tag>, StorageError> {
        let rows = sqlx::query(
            "select name, definition from device_tags where device_id = $1 order by tag_id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        let mut tags = Vec::with_capacity(rows.len());
        for row in rows {
            tags.push(Tag {
                name: row.try_get("name")?,
                definition: row.try_get("definition")?,
                scope: TagScope::Individual,
            });
        }
        Ok(tags)
    }
}
