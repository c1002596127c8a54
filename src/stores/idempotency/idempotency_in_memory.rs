//! In-memory implementation of the idempotency store.
//!
//! Entries map a message id to an absolute expiry instant (milliseconds
//! since epoch). Expiry is enforced lazily: every `has_processed` call
//! sweeps expired entries so memory stays bounded without a background
//! task. The store is volatile by design; a process restart forgets all
//! marks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::IdempotencyStore;
use crate::stores::StoreError;

#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyStore {
    /// message id -> expiry instant in ms since epoch
    entries: Arc<Mutex<HashMap<String, i64>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn has_processed(&self, id: &str) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.lock().await;
        // Opportunistic sweep keeps the map bounded without a janitor task.
        entries.retain(|_, expiry| *expiry > now);
        Ok(entries.contains_key(id))
    }

    async fn mark_processed(&self, id: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let expiry = Utc::now().timestamp_millis() + (ttl_seconds as i64) * 1000;
        let mut entries = self.entries.lock().await;
        entries.insert(id.to_string(), expiry);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
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
    async fn test_mark_and_check() {
        let store = InMemoryIdempotencyStore::new();

        assert!(!store.has_processed("msg-1").await.unwrap());
        store.mark_processed("msg-1", 60).await.unwrap();
        assert!(store.has_processed("msg-1").await.unwrap());
        assert!(!store.has_processed("msg-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let store = InMemoryIdempotencyStore::new();

        store.mark_processed("msg-1", 60).await.unwrap();
        store.mark_processed("msg-1", 60).await.unwrap();
        assert!(store.has_processed("msg-1").await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_clears_entry() {
        let store = InMemoryIdempotencyStore::new();

        store.mark_processed("msg-1", 60).await.unwrap();
        store.remove("msg-1").await.unwrap();
        assert!(!store.has_processed("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = InMemoryIdempotencyStore::new();

        store.mark_processed("msg-1", 1).await.unwrap();
        assert!(store.has_processed("msg-1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!store.has_processed("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_entries() {
        let store = InMemoryIdempotencyStore::new();

        store.mark_processed("short", 1).await.unwrap();
        store.mark_processed("long", 60).await.unwrap();
        assert_eq!(store.len().await, 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        // The sweep inside has_processed drops the expired entry.
        assert!(store.has_processed("long").await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_overwrite_extends_expiry() {
        let store = InMemoryIdempotencyStore::new();

        store.mark_processed("msg-1", 1).await.unwrap();
        store.mark_processed("msg-1", 60).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.has_processed("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryIdempotencyStore::new();

        store.mark_processed("msg-1", 60).await.unwrap();
        store.mark_processed("msg-2", 60).await.unwrap();
        store.clear().await;
        assert!(store.is_empty().await);
    }
}
