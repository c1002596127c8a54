//! Redis implementation of the idempotency store.
//!
//! Each processed id is a plain string value at `<prefix><id>` with a
//! server-enforced TTL, so expiry needs no sweeping and the existence
//! check is a single `EXISTS`. The value itself is opaque; `"1"` is
//! sufficient.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::IdempotencyStore;
use crate::stores::redis_base::RedisStore;
use crate::stores::StoreError;

#[derive(Clone)]
pub struct RedisIdempotencyStore {
    client: Arc<ConnectionManager>,
    key_prefix: String,
}

impl RedisStore for RedisIdempotencyStore {}

impl fmt::Debug for RedisIdempotencyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisIdempotencyStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisIdempotencyStore {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        key_prefix: String,
    ) -> Result<Self, StoreError> {
        if key_prefix.is_empty() {
            return Err(StoreError::InvalidData(
                "Redis key prefix cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            client: connection_manager,
            key_prefix,
        })
    }

    fn entry_key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn has_processed(&self, id: &str) -> Result<bool, StoreError> {
        let key = self.entry_key(id);
        let mut conn = self.client.as_ref().clone();

        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| self.map_redis_error(e, "has_processed"))?;

        debug!(id = %id, exists = exists, "checked idempotency entry");
        Ok(exists)
    }

    async fn mark_processed(&self, id: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let key = self.entry_key(id);
        let mut conn = self.client.as_ref().clone();

        let _: () = conn
            .set_ex(&key, "1", ttl_seconds)
            .await
            .map_err(|e| self.map_redis_error(e, "mark_processed"))?;

        debug!(id = %id, ttl_seconds = ttl_seconds, "marked message as processed");
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let key = self.entry_key(id);
        let mut conn = self.client.as_ref().clone();

        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| self.map_redis_error(e, "remove"))?;

        debug!(id = %id, "removed idempotency entry");
        Ok(())
    }
}
