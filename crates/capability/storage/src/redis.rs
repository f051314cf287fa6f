//! Redis 最近有效值存储

use crate::error::StorageError;
use crate::models::LastValueRecord;
use crate::traits::RealtimeStore;
use domain::{DeviceId, Sample};
use redis::AsyncCommands;

#[derive(serde::Serialize, serde::Deserialize)]
struct LastValuePayload {
    ts_ms: i64,
    value: f64,
}

fn last_value_key(device_id: DeviceId, tag_name: &str) -> String {
    format!("fleet:device:{}:tag:{}:last_value", device_id, tag_name)
}

/// Redis 最近有效值存储（只写入 Good 质量、已转换为 f64 的样本）
pub struct RedisRealtimeStore {
    client: redis::Client,
    last_value_ttl_seconds: Option<u64>,
}

impl RedisRealtimeStore {
    pub fn new(client: redis::Client, last_value_ttl_seconds: Option<u64>) -> Self {
        Self {
            client,
            last_value_ttl_seconds: last_value_ttl_seconds.filter(|ttl| *ttl > 0),
        }
    }

    pub fn connect(
        redis_url: &str,
        last_value_ttl_seconds: Option<u64>,
    ) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self::new(client, last_value_ttl_seconds))
    }
}

#[async_trait::async_trait]
impl RealtimeStore for RedisRealtimeStore {
    async fn upsert_last_values(&self, samples: &[Sample]) -> Result<(), StorageError> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut connection = self.client.get_multiplexed_tokio_connection().await?;
        let mut pipe = redis::pipe();
        for sample in samples {
            let payload = LastValuePayload {
                ts_ms: sample.ts_ms,
                value: sample.value,
            };
            let data = serde_json::to_string(&payload)?;
            let key = last_value_key(sample.device_id, &sample.tag_name);
            match self.last_value_ttl_seconds {
                Some(ttl) => {
                    pipe.set_ex(key, data, ttl).ignore();
                }
                None => {
                    pipe.set(key, data).ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut connection).await?;
        Ok(())
    }

    async fn get_last_value(
        &self,
        device_id: DeviceId,
        tag_name: &str,
    ) -> Result<Option<LastValueRecord>, StorageError> {
        let mut connection = self.client.get_multiplexed_tokio_connection().await?;
        let data: Option<String> = connection.get(last_value_key(device_id, tag_name)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let payload: LastValuePayload = serde_json::from_str(&data)?;
        Ok(Some(LastValueRecord {
            device_id,
            tag_name: tag_name.to_string(),
            value: payload.value,
            ts_ms: payload.ts_ms,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_key_is_scoped_by_device_and_tag() {
        assert_eq!(
            last_value_key(42, "Temp"),
            "fleet:device:42:tag:Temp:last_value"
        );
    }
}
