use async_trait::async_trait;
use innkeep_core::cache::{MarkerStore, SnapshotStore};
use innkeep_core::snapshot::AvailabilitySnapshot;
use innkeep_core::{ReservationError, ReservationResult};
use redis::{AsyncCommands, RedisResult};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

fn snapshot_key(session_token: &str) -> String {
    format!("snapshot:{}", session_token)
}

fn cache_error(err: redis::RedisError) -> ReservationError {
    ReservationError::storage(format!("redis: {}", err))
}

/// Redis rejects `EX 0`, so sub-second TTLs round up to one second.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Written by the search flow; the reservation core only reads snapshots.
    pub async fn put_snapshot(&self, session_token: &str, snapshot: &AvailabilitySnapshot, ttl: Duration) -> ReservationResult<()> {
        let payload = serde_json::to_string(snapshot).map_err(ReservationError::storage)?;
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(cache_error)?;
        conn.set_ex::<_, _, ()>(snapshot_key(session_token), payload, ttl_seconds(ttl))
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

#[async_trait]
impl SnapshotStore for RedisClient {
    async fn get(&self, session_token: &str) -> ReservationResult<Option<AvailabilitySnapshot>> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(cache_error)?;
        let raw: Option<String> = conn.get(snapshot_key(session_token)).await.map_err(cache_error)?;

        match raw {
            Some(json) => {
                let snapshot = serde_json::from_str(&json).map_err(ReservationError::storage)?;
                Ok(Some(snapshot))
            }
            None => {
                debug!(token = %session_token, "snapshot missing or expired");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl MarkerStore for RedisClient {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> ReservationResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(cache_error)?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds(ttl)).await.map_err(cache_error)
    }

    async fn get(&self, key: &str) -> ReservationResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(cache_error)?;
        conn.get(key).await.map_err(cache_error)
    }

    async fn delete(&self, key: &str) -> ReservationResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(cache_error)?;
        conn.del::<_, ()>(key).await.map_err(cache_error)
    }

    async fn take(&self, key: &str) -> ReservationResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(cache_error)?;
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> ReservationResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(cache_error)?;
        let script = redis::Script::new(r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#);

        let deleted: i64 = script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(deleted == 1)
    }
}
