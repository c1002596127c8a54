//! Pluggable per-message state stores.
//!
//! Two side tables back the consumer's lifecycle contracts:
//!
//! - the [idempotency store](idempotency::IdempotencyStore) remembers
//!   which message ids have already been processed (with TTL), so
//!   redeliveries can be suppressed;
//! - the [backoff store](backoff::BackoffStore) remembers which ids are
//!   cooling down after a failure and until when.
//!
//! Each store ships an in-memory implementation (volatile by design) and
//! a Redis-backed one for deployments with multiple consumer replicas.
//! Operations are atomic at the per-id level.

use serde::Serialize;
use thiserror::Error;

pub mod backoff;
pub mod idempotency;
pub mod redis_base;

pub use backoff::{BackoffStorage, BackoffStore, DelayUnit, RetryStrategy};
pub use idempotency::{IdempotencyStorage, IdempotencyStore};

/// Errors that can occur during store operations.
#[derive(Debug, Error, Serialize, Clone)]
pub enum StoreError {
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("store error: {0}")]
    Other(String),
}
