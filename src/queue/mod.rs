//! Queue client abstraction layer.
//!
//! This module provides a transport-agnostic interface for the three queue
//! operations the consumer runtime needs: receiving a batch, deleting a
//! batch, and resetting the visibility timeout of a single message. The
//! production implementation targets the Amazon SQS wire protocol (or a
//! compatible emulator such as LocalStack); tests supply scripted fakes.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub mod sqs;

pub use sqs::SqsQueueClient;

/// Maximum visibility timeout accepted by SQS (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECS: i64 = 43_200;

/// Maximum number of entries in a single `DeleteMessageBatch` call.
pub const DELETE_BATCH_MAX_ENTRIES: usize = 10;

/// Errors that can occur during queue client operations.
#[derive(Debug, Error, Serialize, Clone)]
pub enum QueueClientError {
    #[error("receive error: {0}")]
    ReceiveError(String),
    #[error("delete error: {0}")]
    DeleteError(String),
    #[error("change visibility error: {0}")]
    ChangeVisibilityError(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// A message received from the queue.
///
/// The runtime treats the body as opaque: it is handed to the handler
/// unparsed. `receive_count` carries the queue's `ApproximateReceiveCount`
/// attribute when the queue supplied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Queue-assigned message identifier.
    pub message_id: String,
    /// Opaque token required to delete or re-visibility the message.
    /// Invalidated once the visibility timeout lapses or the message is
    /// deleted.
    pub receipt_handle: String,
    /// Message payload, unparsed.
    pub body: String,
    /// How many times the queue has delivered this message so far.
    pub receive_count: Option<u32>,
}

/// Transport-agnostic queue operations used by the consumer runtime.
///
/// Implementations must tolerate partial failure on `delete_batch`:
/// individual entry failures are logged, not propagated, because the
/// affected messages simply redeliver (at-least-once semantics).
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Receives up to `max` messages, long-polling for up to
    /// `wait_seconds`. Received messages stay hidden from other consumers
    /// for `visibility_seconds`.
    ///
    /// Returns an empty vector when no messages arrive within the window;
    /// fails only on transport error.
    async fn receive(
        &self,
        max: i32,
        wait_seconds: i32,
        visibility_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueClientError>;

    /// Deletes the given messages from the queue, best effort.
    ///
    /// Implementations split the batch to respect the protocol's 10-entry
    /// ceiling. Per-entry failures are logged and swallowed; only a
    /// whole-call transport failure is returned.
    async fn delete_batch(&self, messages: &[QueueMessage]) -> Result<(), QueueClientError>;

    /// Resets the visibility timeout of a single message.
    ///
    /// `visibility_seconds` is clamped to `[0, 43200]` before it reaches
    /// the wire.
    async fn change_visibility(
        &self,
        message: &QueueMessage,
        visibility_seconds: i64,
    ) -> Result<(), QueueClientError>;
}
