//! Handler contract.

use async_trait::async_trait;

use crate::queue::QueueMessage;

use super::outcome::HandlerResult;

/// Per-delivery metadata handed to the handler alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMetadata {
    /// The queue's receive count for this delivery; 0 when the queue did
    /// not report one.
    pub retry_count: u32,
    /// True iff a max-receive threshold is configured and this delivery
    /// reached it.
    pub is_last_attempt: bool,
}

impl MessageMetadata {
    pub fn new(receive_count: Option<u32>, max_receive_count: Option<u32>) -> Self {
        let retry_count = receive_count.unwrap_or(0);
        let is_last_attempt = max_receive_count.is_some_and(|max| retry_count >= max);
        Self {
            retry_count,
            is_last_attempt,
        }
    }
}

/// User-supplied message processing logic.
///
/// The handler is invoked at most once per delivery. It should be
/// idempotent when possible; when an idempotency store is configured the
/// runtime suppresses redeliveries of ids it has already seen succeed,
/// but at-least-once delivery still allows duplicates across store
/// expiry or replica failover.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueueMessage, metadata: &MessageMetadata) -> HandlerResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_count_defaults_to_zero() {
        let metadata = MessageMetadata::new(None, None);
        assert_eq!(metadata.retry_count, 0);
        assert!(!metadata.is_last_attempt);
    }

    #[test]
    fn test_retry_count_from_receive_count() {
        let metadata = MessageMetadata::new(Some(2), None);
        assert_eq!(metadata.retry_count, 2);
        assert!(!metadata.is_last_attempt);
    }

    #[test]
    fn test_last_attempt_at_threshold() {
        let metadata = MessageMetadata::new(Some(5), Some(5));
        assert_eq!(metadata.retry_count, 5);
        assert!(metadata.is_last_attempt);
    }

    #[test]
    fn test_last_attempt_beyond_threshold() {
        let metadata = MessageMetadata::new(Some(7), Some(5));
        assert!(metadata.is_last_attempt);
    }

    #[test]
    fn test_not_last_attempt_below_threshold() {
        let metadata = MessageMetadata::new(Some(4), Some(5));
        assert!(!metadata.is_last_attempt);
    }

    #[test]
    fn test_no_threshold_never_last_attempt() {
        let metadata = MessageMetadata::new(Some(100), None);
        assert!(!metadata.is_last_attempt);
    }
}
