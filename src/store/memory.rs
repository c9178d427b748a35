// 💾 MemoryStore - server-held versioned key/value store
//
// Every write gets a store-wide revision. Entries expire `ttl` after their
// last write and are dropped lazily on read. When the entry ceiling is hit,
// expired entries go first, then the entry with the oldest write.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{StateStore, Subscription, WatchHub, DEFAULT_TTL_SECS};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub max_value_bytes: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        MemoryStoreConfig {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            max_entries: 10_000,
            max_value_bytes: 64 * 1024,
        }
    }
}

struct Entry {
    value: Vec<u8>,
    revision: u64,
    written_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    revision: u64,
}

pub struct MemoryStore {
    config: MemoryStoreConfig,
    inner: Mutex<Inner>,
    hub: WatchHub,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        MemoryStore {
            config,
            inner: Mutex::new(Inner::default()),
            hub: WatchHub::new(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        entry.written_at + self.config.ttl <= now
    }

    /// Live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        match self.lock() {
            Ok(inner) => inner
                .entries
                .values()
                .filter(|e| !self.is_expired(e, now))
                .count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revision of the latest write to `key`, if it is still live
    pub fn revision(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let inner = self.lock().ok()?;
        inner
            .entries
            .get(key)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.revision)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.hub.subscriber_count(key)
    }

    fn make_room(&self, inner: &mut Inner, now: Instant) {
        inner.entries.retain(|_, e| e.written_at + self.config.ttl > now);

        while inner.entries.len() >= self.config.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.revision)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    tracing::debug!(key = %key, "evicting oldest entry at capacity");
                    inner.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock()?;

        let expired = match inner.entries.get(key) {
            None => return Ok(None),
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            inner.entries.remove(key);
            return Ok(None);
        }
        Ok(inner.entries.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        if value.len() > self.config.max_value_bytes {
            return Err(StoreError::ValueTooLarge {
                size: value.len(),
                limit: self.config.max_value_bytes,
            });
        }

        let now = Instant::now();
        let mut inner = self.lock()?;

        if !inner.entries.contains_key(key) {
            self.make_room(&mut inner, now);
        }

        inner.revision += 1;
        let revision = inner.revision;
        self.hub.publish(key, &value);
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                revision,
                written_at: now,
            },
        );

        Ok(revision)
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError> {
        self.hub.subscribe(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(ttl_secs: u64, max_entries: usize) -> MemoryStore {
        MemoryStore::new(MemoryStoreConfig {
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
            max_value_bytes: 16,
        })
    }

    #[tokio::test]
    async fn test_get_put() {
        let store = MemoryStore::default();

        assert_eq!(store.get("a").await.unwrap(), None);

        let r1 = store.put("a", b"one".to_vec()).await.unwrap();
        let r2 = store.put("a", b"two".to_vec()).await.unwrap();

        assert!(r2 > r1);
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.revision("a"), Some(r2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = store_with(60, 10);
        store.put("a", b"x".to_vec()).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("a").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_restarts_on_write() {
        let store = store_with(60, 10);
        store.put("a", b"x".to_vec()).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        store.put("a", b"y".to_vec()).await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.get("a").await.unwrap(), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_write() {
        let store = store_with(3600, 2);
        store.put("a", b"1".to_vec()).await.unwrap();
        store.put("b", b"2".to_vec()).await.unwrap();
        // Rewriting "a" makes "b" the oldest
        store.put("a", b"3".to_vec()).await.unwrap();
        store.put("c", b"4".to_vec()).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.get("a").await.unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get("c").await.unwrap(), Some(b"4".to_vec()));
    }

    #[tokio::test]
    async fn test_value_too_large() {
        let store = store_with(3600, 2);
        let err = store.put("a", vec![0u8; 17]).await.unwrap_err();

        assert!(matches!(err, StoreError::ValueTooLarge { size: 17, limit: 16 }));
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subscribe_sees_later_writes_only() {
        let store = MemoryStore::default();
        store.put("a", b"before".to_vec()).await.unwrap();

        let mut sub = store.subscribe("a").await.unwrap();
        store.put("b", b"other key".to_vec()).await.unwrap();
        store.put("a", b"first".to_vec()).await.unwrap();
        store.put("a", b"second".to_vec()).await.unwrap();

        assert_eq!(sub.next_value().await.unwrap(), b"first".to_vec());
        assert_eq!(sub.next_value().await.unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn test_dropped_subscription_released() {
        let store = MemoryStore::default();
        let sub = store.subscribe("a").await.unwrap();
        assert_eq!(store.subscriber_count("a"), 1);

        drop(sub);
        store.put("a", b"x".to_vec()).await.unwrap();
        assert_eq!(store.subscriber_count("a"), 0);
    }
}
