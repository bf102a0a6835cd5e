//! In-process [`IdempotencyStore`] used by the test suite.
//!
//! Expiry is measured with `tokio::time::Instant`, so tests can pause and
//! advance the clock instead of sleeping. [`MemoryStore::set_unavailable`]
//! simulates a store outage.

use super::IdempotencyStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
pub(crate) struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
    closed: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Number of store operations attempted so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current live value for `key`, bypassing the outage switch.
    pub(crate) fn peek(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        live(&mut entries, key).map(|(v, _)| v.clone())
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("simulated outage".into()));
        }
        Ok(())
    }
}

/// Returns the entry for `key` after purging it if expired.
fn live<'a>(
    entries: &'a mut HashMap<String, (String, Instant)>,
    key: &str,
) -> Option<&'a (String, Instant)> {
    if entries
        .get(key)
        .is_some_and(|(_, expires)| *expires <= Instant::now())
    {
        entries.remove(key);
    }
    entries.get(key)
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(live(&mut self.entries.lock().unwrap(), key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(live(&mut self.entries.lock().unwrap(), key).map(|(v, _)| v.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        Ok(live(&mut entries, key).is_some() && entries.remove(key).is_some())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        assert!(store.set("k", "v", Duration::from_secs(5)).await.unwrap());
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_only_once() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn outage_and_close_are_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Connection(_))
        ));
        store.set_unavailable(false);
        store.close().await;
        assert!(matches!(store.get("k").await, Err(StoreError::Closed)));
    }
}
