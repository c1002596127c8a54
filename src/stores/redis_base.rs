//! Base Redis functionality shared by the Redis-backed stores.

use redis::RedisError;
use tracing::{error, warn};

use super::StoreError;

/// Common error mapping for Redis store implementations.
pub trait RedisStore {
    /// Converts Redis errors to appropriate `StoreError` types.
    fn map_redis_error(&self, error: RedisError, context: &str) -> StoreError {
        match error.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis IO error in {}: {}", context, error);
                StoreError::ConnectionError(format!("Redis connection failed: {}", error))
            }
            redis::ErrorKind::AuthenticationFailed => {
                error!("Redis authentication failed in {}: {}", context, error);
                StoreError::ConnectionError(format!("Redis authentication failed: {}", error))
            }
            redis::ErrorKind::TypeError => {
                error!("Redis type error in {}: {}", context, error);
                StoreError::InvalidData(format!("Redis data type error: {}", error))
            }
            redis::ErrorKind::BusyLoadingError => {
                warn!("Redis busy loading in {}: {}", context, error);
                StoreError::ConnectionError(format!("Redis is loading: {}", error))
            }
            _ => {
                error!("Unexpected Redis error in {}: {}", context, error);
                StoreError::Other(format!("Redis error in {}: {}", context, error))
            }
        }
    }
}
