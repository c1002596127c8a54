//! Backoff Store Module
//!
//! Remembers "this message id is cooling down until time T" so the
//! consumer can defer redeliveries of a failing message. Entries are
//! created on first failure (retry count 1), updated on each subsequent
//! failure, and removed on success. The cool-down is computed from a
//! fixed or exponential strategy with a configurable base delay; there is
//! no jitter, so the arithmetic is deterministic given its inputs.
//!
//! ## Implementations
//!
//! - [`InMemoryBackoffStore`]: process-local map
//! - [`RedisBackoffStore`]: Redis hashes, shared across consumer replicas

pub mod backoff_in_memory;
pub mod backoff_redis;

pub use backoff_in_memory::InMemoryBackoffStore;
pub use backoff_redis::RedisBackoffStore;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use super::StoreError;

/// Default key prefix for the Redis-backed store.
pub const DEFAULT_BACKOFF_PREFIX: &str = "backoff:";

/// Exponent clamp for the exponential strategy. Keeps the delay
/// arithmetic inside u64 for any sane base delay; monotonicity is
/// unaffected because the failure instant always advances.
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Unit of the configured base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayUnit {
    Ms,
    Sec,
    Min,
    Hour,
}

impl DelayUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ms => "ms",
            Self::Sec => "sec",
            Self::Min => "min",
            Self::Hour => "hour",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ms" => Some(Self::Ms),
            "sec" => Some(Self::Sec),
            "min" => Some(Self::Min),
            "hour" => Some(Self::Hour),
            _ => None,
        }
    }

    /// Converts a base delay in this unit to milliseconds.
    pub fn to_millis(&self, base_delay: u64) -> u64 {
        let factor = match self {
            Self::Ms => 1,
            Self::Sec => 1_000,
            Self::Min => 60_000,
            Self::Hour => 3_600_000,
        };
        base_delay.saturating_mul(factor)
    }
}

impl fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry pacing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    Exponential,
    Fixed,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exponential" => Some(Self::Exponential),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One id's recorded failure state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffEntry {
    /// Strictly positive for entries that exist; the first recorded
    /// failure yields 1.
    pub retry_count: u32,
    /// Instant of the most recent failure, ms since epoch.
    pub last_failure_ms: i64,
    /// Base delay in `base_delay_unit` units, as configured by the caller.
    pub base_delay: u64,
    pub base_delay_unit: DelayUnit,
    pub strategy: RetryStrategy,
}

impl BackoffEntry {
    /// The instant before which `can_process` answers false.
    ///
    /// - fixed:       `last_failure + base_delay`
    /// - exponential: `last_failure + base_delay * 2^(retry_count - 1)`,
    ///   so the first backoff equals the base delay.
    pub fn next_retry_ms(&self) -> i64 {
        let base_ms = self.base_delay_unit.to_millis(self.base_delay);
        let delay_ms = compute_delay_ms(base_ms, self.retry_count, self.strategy);
        self.last_failure_ms.saturating_add(delay_ms as i64)
    }
}

/// Delay in milliseconds for the given retry count and strategy.
pub(crate) fn compute_delay_ms(base_ms: u64, retry_count: u32, strategy: RetryStrategy) -> u64 {
    match strategy {
        RetryStrategy::Fixed => base_ms,
        RetryStrategy::Exponential => {
            let exponent = retry_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
            base_ms.saturating_mul(2_u64.saturating_pow(exponent))
        }
    }
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait BackoffStore: Send + Sync {
    /// Returns true iff no entry exists for `id`, or its cool-down has
    /// lapsed (`now >= next_retry`).
    async fn can_process(&self, id: &str) -> Result<bool, StoreError>;

    /// Records a failure for `id`: creates the entry with retry count 1
    /// if absent, otherwise increments it, and stamps the failure instant.
    /// Returns the computed next-retry instant in ms since epoch.
    async fn record_failure(
        &self,
        id: &str,
        base_delay: u64,
        base_delay_unit: DelayUnit,
        strategy: RetryStrategy,
    ) -> Result<i64, StoreError>;

    /// Returns the recorded retry count for `id`; 0 if no entry exists.
    async fn get_retry_count(&self, id: &str) -> Result<u32, StoreError>;

    /// Removes the entry for `id`; called on success. No-op if absent.
    async fn clear(&self, id: &str) -> Result<(), StoreError>;
}

/// Enum wrapper for the backoff store implementations.
#[derive(Debug, Clone)]
pub enum BackoffStorage {
    InMemory(InMemoryBackoffStore),
    Redis(RedisBackoffStore),
}

impl BackoffStorage {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryBackoffStore::new())
    }

    /// Redis-backed store under the default `backoff:` prefix.
    pub fn new_redis(connection_manager: Arc<ConnectionManager>) -> Result<Self, StoreError> {
        Self::new_redis_with_prefix(connection_manager, DEFAULT_BACKOFF_PREFIX)
    }

    pub fn new_redis_with_prefix(
        connection_manager: Arc<ConnectionManager>,
        key_prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        Ok(Self::Redis(RedisBackoffStore::new(
            connection_manager,
            key_prefix.into(),
        )?))
    }
}

#[async_trait]
impl BackoffStore for BackoffStorage {
    async fn can_process(&self, id: &str) -> Result<bool, StoreError> {
        match self {
            BackoffStorage::InMemory(store) => store.can_process(id).await,
            BackoffStorage::Redis(store) => store.can_process(id).await,
        }
    }

    async fn record_failure(
        &self,
        id: &str,
        base_delay: u64,
        base_delay_unit: DelayUnit,
        strategy: RetryStrategy,
    ) -> Result<i64, StoreError> {
        match self {
            BackoffStorage::InMemory(store) => {
                store
                    .record_failure(id, base_delay, base_delay_unit, strategy)
                    .await
            }
            BackoffStorage::Redis(store) => {
                store
                    .record_failure(id, base_delay, base_delay_unit, strategy)
                    .await
            }
        }
    }

    async fn get_retry_count(&self, id: &str) -> Result<u32, StoreError> {
        match self {
            BackoffStorage::InMemory(store) => store.get_retry_count(id).await,
            BackoffStorage::Redis(store) => store.get_retry_count(id).await,
        }
    }

    async fn clear(&self, id: &str) -> Result<(), StoreError> {
        match self {
            BackoffStorage::InMemory(store) => store.clear(id).await,
            BackoffStorage::Redis(store) => store.clear(id).await,
        }
    }
}
