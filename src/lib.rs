//! # Conveyor
//!
//! A reusable Amazon SQS consumer runtime. The runtime polls a queue,
//! dispatches each message to a user-supplied handler, and implements the
//! per-message lifecycle contracts: at-most-once via a pluggable
//! idempotency store, at-least-once via a pluggable retry-backoff store,
//! permanent-failure disposal, and batched deletion.
//!
//! The crate also ships a double-buffered [`aggregator`] for handlers
//! that collapse many per-message updates into one periodic bulk write.
//!
//! ## Components
//!
//! - [`queue`] — the [`QueueClient`](queue::QueueClient) abstraction and
//!   its AWS SQS implementation.
//! - [`stores`] — idempotency and backoff stores, each with an in-memory
//!   and a Redis-backed variant.
//! - [`consumer`] — the [`SqsConsumer`](consumer::SqsConsumer) polling
//!   runtime, handler contract, and outcome vocabulary.
//! - [`aggregator`] — the swap-buffer write aggregator.
//!
//! ## Example
//!
//! ```ignore
//! let client = Arc::new(SqsQueueClient::new(queue_url.clone(), None).await);
//! let consumer = SqsConsumer::new(ConsumerConfig::new(queue_url), client, handler)?
//!     .with_idempotency_store(Arc::new(IdempotencyStorage::new_in_memory()))
//!     .with_backoff_store(Arc::new(BackoffStorage::new_in_memory()));
//! consumer.start().await?;
//! // ...
//! consumer.stop().await;
//! ```

pub mod aggregator;
pub mod consumer;
pub mod queue;
pub mod stores;

pub use aggregator::{Aggregator, AggregatorConfig, AggregatorError, FlushSink};
pub use consumer::{
    ConsumerConfig, ConsumerError, HandlerError, HandlerResult, MessageHandler, MessageMetadata,
    MessageOutcome, SqsConsumer,
};
pub use queue::{QueueClient, QueueClientError, QueueMessage, SqsQueueClient};
pub use stores::{
    BackoffStorage, BackoffStore, DelayUnit, IdempotencyStorage, IdempotencyStore, RetryStrategy,
    StoreError,
};
