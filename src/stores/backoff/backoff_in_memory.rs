//! In-memory implementation of the backoff store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{BackoffEntry, BackoffStore, DelayUnit, RetryStrategy};
use crate::stores::StoreError;

#[derive(Debug, Clone, Default)]
pub struct InMemoryBackoffStore {
    entries: Arc<Mutex<HashMap<String, BackoffEntry>>>,
}

impl InMemoryBackoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one id's entry, for inspection in tests.
    pub async fn get_entry(&self, id: &str) -> Option<BackoffEntry> {
        self.entries.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl BackoffStore for InMemoryBackoffStore {
    async fn can_process(&self, id: &str) -> Result<bool, StoreError> {
        let entries = self.entries.lock().await;
        match entries.get(id) {
            None => Ok(true),
            Some(entry) => Ok(Utc::now().timestamp_millis() >= entry.next_retry_ms()),
        }
    }

    async fn record_failure(
        &self,
        id: &str,
        base_delay: u64,
        base_delay_unit: DelayUnit,
        strategy: RetryStrategy,
    ) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(id.to_string())
            .and_modify(|entry| {
                entry.retry_count = entry.retry_count.saturating_add(1);
                entry.last_failure_ms = now;
                entry.base_delay = base_delay;
                entry.base_delay_unit = base_delay_unit;
                entry.strategy = strategy;
            })
            .or_insert(BackoffEntry {
                retry_count: 1,
                last_failure_ms: now,
                base_delay,
                base_delay_unit,
                strategy,
            });
        Ok(entry.next_retry_ms())
    }

    async fn get_retry_count(&self, id: &str) -> Result<u32, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(id).map(|entry| entry.retry_count).unwrap_or(0))
    }

    async fn clear(&self, id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unknown_id_can_process() {
        let store = InMemoryBackoffStore::new();
        assert!(store.can_process("msg-1").await.unwrap());
        assert_eq!(store.get_retry_count("msg-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_failure_creates_entry_with_count_one() {
        let store = InMemoryBackoffStore::new();

        let next = store
            .record_failure("msg-1", 5, DelayUnit::Sec, RetryStrategy::Exponential)
            .await
            .unwrap();

        assert_eq!(store.get_retry_count("msg-1").await.unwrap(), 1);
        let entry = store.get_entry("msg-1").await.unwrap();
        // First backoff equals the base delay.
        assert_eq!(next - entry.last_failure_ms, 5_000);
    }

    #[tokio::test]
    async fn test_record_failure_increments_count() {
        let store = InMemoryBackoffStore::new();

        for expected in 1..=4 {
            store
                .record_failure("msg-1", 5, DelayUnit::Sec, RetryStrategy::Exponential)
                .await
                .unwrap();
            assert_eq!(store.get_retry_count("msg-1").await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_exponential_delay_doubles_per_failure() {
        let store = InMemoryBackoffStore::new();

        for expected_delay in [5_000, 10_000, 20_000, 40_000] {
            let next = store
                .record_failure("msg-1", 5, DelayUnit::Sec, RetryStrategy::Exponential)
                .await
                .unwrap();
            let entry = store.get_entry("msg-1").await.unwrap();
            assert_eq!(next - entry.last_failure_ms, expected_delay);
        }
    }

    #[tokio::test]
    async fn test_fixed_delay_is_constant() {
        let store = InMemoryBackoffStore::new();

        for _ in 0..4 {
            let next = store
                .record_failure("msg-1", 5, DelayUnit::Sec, RetryStrategy::Fixed)
                .await
                .unwrap();
            let entry = store.get_entry("msg-1").await.unwrap();
            assert_eq!(next - entry.last_failure_ms, 5_000);
        }
    }

    #[tokio::test]
    async fn test_can_process_gates_until_cooldown_lapses() {
        let store = InMemoryBackoffStore::new();

        store
            .record_failure("msg-1", 50, DelayUnit::Ms, RetryStrategy::Exponential)
            .await
            .unwrap();
        assert!(!store.can_process("msg-1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.can_process("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_entry() {
        let store = InMemoryBackoffStore::new();

        store
            .record_failure("msg-1", 5, DelayUnit::Min, RetryStrategy::Exponential)
            .await
            .unwrap();
        assert!(!store.can_process("msg-1").await.unwrap());

        store.clear("msg-1").await.unwrap();
        assert!(store.can_process("msg-1").await.unwrap());
        assert_eq!(store.get_retry_count("msg-1").await.unwrap(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_absent_id_is_noop() {
        let store = InMemoryBackoffStore::new();
        store.clear("never-seen").await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_are_independent_per_id() {
        let store = InMemoryBackoffStore::new();

        store
            .record_failure("msg-1", 5, DelayUnit::Sec, RetryStrategy::Exponential)
            .await
            .unwrap();
        store
            .record_failure("msg-1", 5, DelayUnit::Sec, RetryStrategy::Exponential)
            .await
            .unwrap();
        store
            .record_failure("msg-2", 5, DelayUnit::Sec, RetryStrategy::Exponential)
            .await
            .unwrap();

        assert_eq!(store.get_retry_count("msg-1").await.unwrap(), 2);
        assert_eq!(store.get_retry_count("msg-2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_next_retry_monotonic_across_failures() {
        let store = InMemoryBackoffStore::new();

        let mut previous = i64::MIN;
        for _ in 0..10 {
            let next = store
                .record_failure("msg-1", 1, DelayUnit::Ms, RetryStrategy::Exponential)
                .await
                .unwrap();
            assert!(next >= previous);
            previous = next;
        }
    }
}
