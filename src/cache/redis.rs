//! Redis-backed [`KeyValueStore`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::store::{KeyValueStore, StoreError, StoreResult, ttl_seconds};

/// Shares one multiplexed connection across all callers.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(StoreError::connection)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::connection)?;
        Ok(Self { connection })
    }
}

fn map_err(key: &str, err: redis::RedisError) -> StoreError {
    if err.code() == Some("WRONGTYPE") {
        return StoreError::WrongType {
            key: key.to_string(),
        };
    }
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        return StoreError::connection(err);
    }
    StoreError::backend(err)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(|err| map_err(key, err))?;
        Ok(value.map(Bytes::from))
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Bytes) -> StoreResult<()> {
        let seconds = ttl_seconds(ttl)?;
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, value.as_ref(), seconds)
            .await
            .map_err(|err| map_err(key, err))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await.map_err(|err| map_err(key, err))?;
        Ok(removed > 0)
    }

    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|err| map_err(key, err))
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.connection.clone();
        conn.hgetall(key).await.map_err(|err| map_err(key, err))
    }
}
