//! Redis implementation of the backoff store.
//!
//! Each id's failure state is a hash at `<prefix><id>` with the fields
//! `retryCount`, `lastFailureTime` (ms since epoch), `baseDelay`,
//! `baseDelayUnit`, and `strategy`. Recording a failure increments the
//! count and restamps the remaining fields in one atomic pipeline, so
//! concurrent consumers observe a consistent entry. Entries are removed
//! by `clear` on success.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::{BackoffEntry, BackoffStore, DelayUnit, RetryStrategy};
use crate::stores::redis_base::RedisStore;
use crate::stores::StoreError;

const FIELD_RETRY_COUNT: &str = "retryCount";
const FIELD_LAST_FAILURE_TIME: &str = "lastFailureTime";
const FIELD_BASE_DELAY: &str = "baseDelay";
const FIELD_BASE_DELAY_UNIT: &str = "baseDelayUnit";
const FIELD_STRATEGY: &str = "strategy";

#[derive(Clone)]
pub struct RedisBackoffStore {
    client: Arc<ConnectionManager>,
    key_prefix: String,
}

impl RedisStore for RedisBackoffStore {}

impl fmt::Debug for RedisBackoffStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackoffStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// Parses a hash snapshot into an entry. An empty hash means no entry.
fn entry_from_hash(fields: HashMap<String, String>) -> Result<Option<BackoffEntry>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let parse_u64 = |field: &str| -> Result<u64, StoreError> {
        fields
            .get(field)
            .ok_or_else(|| StoreError::InvalidData(format!("Missing backoff field {field}")))?
            .parse::<u64>()
            .map_err(|e| StoreError::InvalidData(format!("Invalid backoff field {field}: {e}")))
    };

    let retry_count = parse_u64(FIELD_RETRY_COUNT)? as u32;
    let last_failure_ms = fields
        .get(FIELD_LAST_FAILURE_TIME)
        .ok_or_else(|| {
            StoreError::InvalidData(format!("Missing backoff field {FIELD_LAST_FAILURE_TIME}"))
        })?
        .parse::<i64>()
        .map_err(|e| {
            StoreError::InvalidData(format!(
                "Invalid backoff field {FIELD_LAST_FAILURE_TIME}: {e}"
            ))
        })?;
    let base_delay = parse_u64(FIELD_BASE_DELAY)?;
    let base_delay_unit = fields
        .get(FIELD_BASE_DELAY_UNIT)
        .and_then(|value| DelayUnit::parse(value))
        .ok_or_else(|| {
            StoreError::InvalidData(format!("Invalid backoff field {FIELD_BASE_DELAY_UNIT}"))
        })?;
    let strategy = fields
        .get(FIELD_STRATEGY)
        .and_then(|value| RetryStrategy::parse(value))
        .ok_or_else(|| StoreError::InvalidData(format!("Invalid backoff field {FIELD_STRATEGY}")))?;

    Ok(Some(BackoffEntry {
        retry_count,
        last_failure_ms,
        base_delay,
        base_delay_unit,
        strategy,
    }))
}

impl RedisBackoffStore {
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
impl BackoffStore for RedisBackoffStore {
    async fn can_process(&self, id: &str) -> Result<bool, StoreError> {
        let key = self.entry_key(id);
        let mut conn = self.client.as_ref().clone();

        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| self.map_redis_error(e, "can_process"))?;

        match entry_from_hash(fields)? {
            None => Ok(true),
            Some(entry) => {
                let can_process = Utc::now().timestamp_millis() >= entry.next_retry_ms();
                debug!(
                    id = %id,
                    retry_count = entry.retry_count,
                    can_process = can_process,
                    "checked backoff gate"
                );
                Ok(can_process)
            }
        }
    }

    async fn record_failure(
        &self,
        id: &str,
        base_delay: u64,
        base_delay_unit: DelayUnit,
        strategy: RetryStrategy,
    ) -> Result<i64, StoreError> {
        let key = self.entry_key(id);
        let now = Utc::now().timestamp_millis();
        let mut conn = self.client.as_ref().clone();

        // HINCRBY creates the hash with count 1 on first failure; the
        // atomic pipeline keeps count and stamp consistent under races.
        let (retry_count,): (u32,) = redis::pipe()
            .atomic()
            .hincr(&key, FIELD_RETRY_COUNT, 1)
            .hset(&key, FIELD_LAST_FAILURE_TIME, now)
            .ignore()
            .hset(&key, FIELD_BASE_DELAY, base_delay)
            .ignore()
            .hset(&key, FIELD_BASE_DELAY_UNIT, base_delay_unit.as_str())
            .ignore()
            .hset(&key, FIELD_STRATEGY, strategy.as_str())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_redis_error(e, "record_failure"))?;

        let entry = BackoffEntry {
            retry_count,
            last_failure_ms: now,
            base_delay,
            base_delay_unit,
            strategy,
        };
        let next_retry = entry.next_retry_ms();

        debug!(
            id = %id,
            retry_count = retry_count,
            next_retry_ms = next_retry,
            "recorded failure"
        );
        Ok(next_retry)
    }

    async fn get_retry_count(&self, id: &str) -> Result<u32, StoreError> {
        let key = self.entry_key(id);
        let mut conn = self.client.as_ref().clone();

        let count: Option<u32> = conn
            .hget(&key, FIELD_RETRY_COUNT)
            .await
            .map_err(|e| self.map_redis_error(e, "get_retry_count"))?;

        Ok(count.unwrap_or(0))
    }

    async fn clear(&self, id: &str) -> Result<(), StoreError> {
        let key = self.entry_key(id);
        let mut conn = self.client.as_ref().clone();

        let _: () = conn
            .del(&key)
            .await
            .map_err(|e| self.map_redis_error(e, "clear"))?;

        debug!(id = %id, "cleared backoff entry");
        Ok(())
    }
}
