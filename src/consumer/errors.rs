use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the consumer runtime.
///
/// Transport errors are recovered inside the polling loop and never
/// escalate; only configuration problems are fatal, and those are
/// rejected at construction time.
#[derive(Debug, Error, Serialize, Clone)]
pub enum ConsumerError {
    #[error("configuration error: {0}")]
    ConfigError(String),
}
