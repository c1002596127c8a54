//! Outcome vocabulary for message processing.
//!
//! A handler reports its verdict in one of two equivalent ways: by
//! returning a [`MessageOutcome`] explicitly, or by returning a typed
//! [`HandlerError`]. Both converge in [`classify`], which produces
//! exactly one terminal classification per message per delivery. Errors
//! the runtime does not recognize map to a retry, the conservative
//! default.

use thiserror::Error;
use tracing::error;

/// Terminal classification of one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Processed; delete from the queue, record idempotency, clear
    /// backoff.
    Success,
    /// Transient fault; leave undeleted so the queue redelivers, record
    /// the failure in the backoff store.
    Retry { reason: Option<String> },
    /// Permanent fault (malformed input, violated invariant); delete
    /// from the queue and keep the idempotency mark so redeliveries are
    /// suppressed.
    Failure { reason: Option<String> },
}

impl MessageOutcome {
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: Some(reason.into()),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: Some(reason.into()),
        }
    }
}

/// Typed error surface for handlers that prefer error returns over
/// explicit outcomes.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient fault; equivalent to [`MessageOutcome::Retry`].
    #[error("transient handler failure: {0}")]
    Transient(String),
    /// Permanent fault; equivalent to [`MessageOutcome::Failure`].
    #[error("permanent handler failure: {0}")]
    Permanent(String),
    /// Anything else a handler bubbled up. Treated as transient.
    #[error("unexpected handler error: {0}")]
    Unexpected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for HandlerError {
    fn from(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Unexpected(error)
    }
}

/// What a handler invocation produces.
pub type HandlerResult = Result<MessageOutcome, HandlerError>;

/// Converges the two handler surfaces into one classification.
pub fn classify(result: HandlerResult) -> MessageOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(HandlerError::Transient(reason)) => MessageOutcome::Retry {
            reason: Some(reason),
        },
        Err(HandlerError::Permanent(reason)) => MessageOutcome::Failure {
            reason: Some(reason),
        },
        // Unrecognized errors retry: a transient cause is the safer guess.
        Err(HandlerError::Unexpected(source)) => {
            error!(error = %source, "Unrecognized handler error; treating as transient");
            MessageOutcome::Retry {
                reason: Some(source.to_string()),
            }
        }
    }
}
