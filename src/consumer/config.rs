use crate::stores::{DelayUnit, RetryStrategy};

use super::errors::ConsumerError;

/// Consumer runtime configuration.
///
/// All ranges follow the SQS wire limits: at most 10 messages per
/// receive, at most 20 seconds of long polling. Validation runs at
/// consumer construction; an invalid configuration refuses to start.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// URL of the queue to consume. Required.
    pub queue_url: String,
    /// Messages requested per receive call, in `[1, 10]`. Default: 10.
    pub max_number_of_messages: i32,
    /// Long-poll window in seconds, in `[0, 20]`. Default: 20.
    pub wait_time_seconds: i32,
    /// Visibility timeout applied to received messages, in seconds.
    /// Default: 30.
    pub visibility_timeout: i32,
    /// When set, `is_last_attempt` becomes true once the receive count
    /// reaches this threshold. Used for metadata only.
    pub max_receive_count: Option<u32>,
    /// Idle sleep between empty polls, in milliseconds. Default: 1000.
    pub poll_interval_ms: u64,
    /// Dispatch the messages of one batch concurrently instead of in
    /// arrival order. Default: false.
    pub process_in_parallel: bool,
    /// TTL for idempotency marks, in seconds. Default: 86400.
    pub idempotency_ttl_seconds: u64,
    /// Mark messages as processed before dispatching the handler, so
    /// concurrent deliveries of the same id across replicas deduplicate.
    /// Non-terminal outcomes remove the mark again. Default: false.
    pub mark_before_dispatch: bool,
    /// Base delay handed to the backoff store on failure. Default: 5.
    pub backoff_base_delay: u64,
    /// Unit of `backoff_base_delay`. Default: seconds.
    pub backoff_base_delay_unit: DelayUnit,
    /// Backoff strategy recorded on failure. Default: exponential.
    pub retry_strategy: RetryStrategy,
}

impl ConsumerConfig {
    /// Creates a configuration for `queue_url` with the documented
    /// defaults.
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            max_number_of_messages: 10,
            wait_time_seconds: 20,
            visibility_timeout: 30,
            max_receive_count: None,
            poll_interval_ms: 1_000,
            process_in_parallel: false,
            idempotency_ttl_seconds: 86_400,
            mark_before_dispatch: false,
            backoff_base_delay: 5,
            backoff_base_delay_unit: DelayUnit::Sec,
            retry_strategy: RetryStrategy::Exponential,
        }
    }

    /// Checks every field against its documented range.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.queue_url.is_empty() || !self.queue_url.contains("://") {
            return Err(ConsumerError::ConfigError(format!(
                "Invalid queue URL: '{}'",
                self.queue_url
            )));
        }
        if !(1..=10).contains(&self.max_number_of_messages) {
            return Err(ConsumerError::ConfigError(format!(
                "max_number_of_messages must be in [1, 10], got {}",
                self.max_number_of_messages
            )));
        }
        if !(0..=20).contains(&self.wait_time_seconds) {
            return Err(ConsumerError::ConfigError(format!(
                "wait_time_seconds must be in [0, 20], got {}",
                self.wait_time_seconds
            )));
        }
        if self.visibility_timeout < 0 {
            return Err(ConsumerError::ConfigError(format!(
                "visibility_timeout must be non-negative, got {}",
                self.visibility_timeout
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConsumerError::ConfigError(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.idempotency_ttl_seconds == 0 {
            return Err(ConsumerError::ConfigError(
                "idempotency_ttl_seconds must be positive".to_string(),
            ));
        }
        if self.backoff_base_delay == 0 {
            return Err(ConsumerError::ConfigError(
                "backoff_base_delay must be positive".to_string(),
            ));
        }
        if self.max_receive_count == Some(0) {
            return Err(ConsumerError::ConfigError(
                "max_receive_count must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ConsumerConfig {
        ConsumerConfig::new("http://localhost:4566/000000000000/posts-queue")
    }

    #[test]
    fn test_defaults() {
        let config = valid_config();
        assert_eq!(config.max_number_of_messages, 10);
        assert_eq!(config.wait_time_seconds, 20);
        assert_eq!(config.visibility_timeout, 30);
        assert_eq!(config.max_receive_count, None);
        assert_eq!(config.poll_interval_ms, 1_000);
        assert!(!config.process_in_parallel);
        assert_eq!(config.idempotency_ttl_seconds, 86_400);
        assert!(!config.mark_before_dispatch);
        assert_eq!(config.backoff_base_delay, 5);
        assert_eq!(config.backoff_base_delay_unit, DelayUnit::Sec);
        assert_eq!(config.retry_strategy, RetryStrategy::Exponential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_queue_url_rejected() {
        let config = ConsumerConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_queue_url_rejected() {
        let config = ConsumerConfig::new("not-a-url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_number_of_messages_bounds() {
        let mut config = valid_config();
        config.max_number_of_messages = 0;
        assert!(config.validate().is_err());

        config.max_number_of_messages = 11;
        assert!(config.validate().is_err());

        config.max_number_of_messages = 1;
        assert!(config.validate().is_ok());
        config.max_number_of_messages = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wait_time_seconds_bounds() {
        let mut config = valid_config();
        config.wait_time_seconds = -1;
        assert!(config.validate().is_err());

        config.wait_time_seconds = 21;
        assert!(config.validate().is_err());

        config.wait_time_seconds = 0;
        assert!(config.validate().is_ok());
        config.wait_time_seconds = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_visibility_timeout_rejected() {
        let mut config = valid_config();
        config.visibility_timeout = -1;
        assert!(config.validate().is_err());

        config.visibility_timeout = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = valid_config();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_idempotency_ttl_rejected() {
        let mut config = valid_config();
        config.idempotency_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_backoff_base_delay_rejected() {
        let mut config = valid_config();
        config.backoff_base_delay = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_receive_count_rejected() {
        let mut config = valid_config();
        config.max_receive_count = Some(0);
        assert!(config.validate().is_err());

        config.max_receive_count = Some(5);
        assert!(config.validate().is_ok());
    }
}
