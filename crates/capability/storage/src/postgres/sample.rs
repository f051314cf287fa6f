//! Postgres 样本批量写入

use crate::error::StorageError;
use crate::traits::SampleStore;
use domain::Sample;
use sqlx::{PgPool, QueryBuilder};

/// Postgres 单条语句绑定参数上限为 65535，每行 4 个参数。
const MAX_ROWS_PER_STATEMENT: usize = 16_000;

pub struct PgSampleStore {
    pub pool: PgPool,
}

impl PgSampleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SampleStore for PgSampleStore {
    async fn write_samples(&self, samples: &[Sample]) -> Result<usize, StorageError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for chunk in samples.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<sqlx::Postgres> =
                QueryBuilder::new("insert into samples (device_id, tag_name, ts, value) ");
            builder.push_values(chunk, |mut row, sample| {
                row.push_bind(sample.device_id)
                    .push_bind(&sample.tag_name)
                    .push("to_timestamp(")
                    .push_bind_unseparated(sample.ts_ms as f64)
                    .push_unseparated(" / 1000.0)")
                    .push_bind(sample.value);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(samples.len())
    }
}
