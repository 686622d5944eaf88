//! Idempotency lock store boundary.
//!
//! Duplicate delivery suppression rests entirely on one primitive: an atomic
//! create-if-absent with TTL in a shared keyed store. A key's existence means
//! "being processed or recently processed"; keys are never deleted, they
//! expire. [`InMemoryLockStore`] expires entries lazily on probe and serves
//! single-process deployments and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed store with atomic create-if-absent semantics.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create `key` with `value` and a TTL, succeeding only if the key does
    /// not already exist. Returns true iff the lock was acquired.
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError>;
}

/// The idempotency lock key for a ticket id.
pub fn ticket_lock_key(ticket_id: &str) -> String {
    format!("ticket:{ticket_id}:lock")
}

struct LockEntry {
    #[allow(dead_code)]
    value: String,
    expires_at: Instant,
}

/// Process-local TTL map.
#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| e.expires_at > now);

        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_create_acquires() {
        let store = InMemoryLockStore::new();
        let acquired = store
            .create_if_absent("ticket:a:lock", "1", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(acquired);
    }

    #[tokio::test]
    async fn test_second_create_within_ttl_fails() {
        let store = InMemoryLockStore::new();
        let ttl = Duration::from_secs(30);
        assert!(store.create_if_absent("k", "1", ttl).await.unwrap());
        assert!(!store.create_if_absent("k", "1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_expires_after_ttl() {
        let store = InMemoryLockStore::new();
        let ttl = Duration::from_millis(30);
        assert!(store.create_if_absent("k", "1", ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.create_if_absent("k", "1", ttl).await.unwrap());
    }

    #[test]
    fn test_ticket_lock_key_format() {
        assert_eq!(ticket_lock_key("t-42"), "ticket:t-42:lock");
    }
}
