//! Idempotency Store Module
//!
//! Remembers "this message id has been processed" with a TTL, so the
//! consumer can suppress duplicate deliveries of the same id. Entries are
//! created when a message reaches a terminal outcome (or defensively
//! before dispatch when pre-marking is enabled) and vanish on TTL expiry
//! or explicit removal.
//!
//! ## Implementations
//!
//! - [`InMemoryIdempotencyStore`]: process-local map, volatile by design
//! - [`RedisIdempotencyStore`]: Redis strings with server-enforced TTL,
//!   for deduplication across consumer replicas

pub mod idempotency_in_memory;
pub mod idempotency_redis;

pub use idempotency_in_memory::InMemoryIdempotencyStore;
pub use idempotency_redis::RedisIdempotencyStore;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use super::StoreError;

/// Default key prefix for the Redis-backed store.
pub const DEFAULT_IDEMPOTENCY_PREFIX: &str = "idempotency:";

#[async_trait]
#[cfg_attr(test, automock)]
pub trait IdempotencyStore: Send + Sync {
    /// Returns true iff an unexpired entry for `id` exists.
    async fn has_processed(&self, id: &str) -> Result<bool, StoreError>;

    /// (Re)sets the entry for `id` with expiry `now + ttl_seconds`.
    /// Idempotent; a second call overwrites the previous expiry.
    async fn mark_processed(&self, id: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Clears the entry for `id`; no-op if absent.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;
}

/// Enum wrapper for the idempotency store implementations.
#[derive(Debug, Clone)]
pub enum IdempotencyStorage {
    InMemory(InMemoryIdempotencyStore),
    Redis(RedisIdempotencyStore),
}

impl IdempotencyStorage {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryIdempotencyStore::new())
    }

    /// Redis-backed store under the default `idempotency:` prefix.
    pub fn new_redis(connection_manager: Arc<ConnectionManager>) -> Result<Self, StoreError> {
        Self::new_redis_with_prefix(connection_manager, DEFAULT_IDEMPOTENCY_PREFIX)
    }

    pub fn new_redis_with_prefix(
        connection_manager: Arc<ConnectionManager>,
        key_prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        Ok(Self::Redis(RedisIdempotencyStore::new(
            connection_manager,
            key_prefix.into(),
        )?))
    }
}

#[async_trait]
impl IdempotencyStore for IdempotencyStorage {
    async fn has_processed(&self, id: &str) -> Result<bool, StoreError> {
        match self {
            IdempotencyStorage::InMemory(store) => store.has_processed(id).await,
            IdempotencyStorage::Redis(store) => store.has_processed(id).await,
        }
    }

    async fn mark_processed(&self, id: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        match self {
            IdempotencyStorage::InMemory(store) => store.mark_processed(id, ttl_seconds).await,
            IdempotencyStorage::Redis(store) => store.mark_processed(id, ttl_seconds).await,
        }
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        match self {
            IdempotencyStorage::InMemory(store) => store.remove(id).await,
            IdempotencyStorage::Redis(store) => store.remove(id).await,
        }
    }
}
