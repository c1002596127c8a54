//! Consumer runtime.
//!
//! [`SqsConsumer`] runs the polling loop: it pulls batches from a
//! [`QueueClient`](crate::queue::QueueClient), consults the configured
//! idempotency and backoff stores, dispatches each message to the
//! caller's [`MessageHandler`], classifies the result into the outcome
//! vocabulary, and batch-deletes terminal messages. Retried messages are
//! left undeleted so the queue redelivers them, optionally re-paced via
//! a backoff-derived visibility timeout.

pub mod config;
pub mod errors;
pub mod handler;
pub mod outcome;
pub mod runtime;

pub use config::ConsumerConfig;
pub use errors::ConsumerError;
pub use handler::{MessageHandler, MessageMetadata};
pub use outcome::{HandlerError, HandlerResult, MessageOutcome};
pub use runtime::SqsConsumer;
