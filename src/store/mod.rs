// 🗄️ State Store - key → blob persistence with watch
//
// The engine only ever talks to a store through `StateStore`. Backends:
// - MemoryStore:     server-held, versioned, TTL + capacity ceiling
// - SqliteStore:     server-held, survives restarts, TTL on read
// - ClientBlobStore: client-held cookie blob, subscriptions never fire

pub mod client;
pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::StoreError;

pub use client::ClientBlobStore;
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use sqlite::SqliteStore;

/// Default lifetime of a session's roster
pub const DEFAULT_TTL_SECS: u64 = 60 * 60;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current value under `key`; `Ok(None)` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrite `key`, returning the revision assigned to the write
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError>;

    /// Every write to `key` made after this call, in write order.
    /// Earlier writes are not replayed.
    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError>;
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Stream of payloads written under one key.
///
/// Dropping it removes its slot from the hub, and the key with it once no
/// subscriber is left.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    // Keeps `rx` open for subscriptions that never fire
    _idle: Option<mpsc::UnboundedSender<Vec<u8>>>,
    release: Option<(Weak<Mutex<SubscriberMap>>, String)>,
}

impl Subscription {
    /// A subscription that stays open but never yields
    pub fn idle() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Subscription {
            rx,
            _idle: Some(tx),
            release: None,
        }
    }

    /// Next payload, or `None` once the store dropped the subscription
    pub async fn next_value(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some((hub, key)) = self.release.take() else {
            return;
        };
        // Our sender only reads as closed once the receiver is
        self.rx.close();
        if let Some(subscribers) = hub.upgrade() {
            if let Ok(mut subscribers) = subscribers.lock() {
                prune(&mut subscribers, &key);
            }
        }
    }
}

impl Stream for Subscription {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ============================================================================
// WATCH HUB
// ============================================================================

type SubscriberMap = HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>;

fn prune(subscribers: &mut SubscriberMap, key: &str) {
    if let Some(senders) = subscribers.get_mut(key) {
        senders.retain(|s| !s.is_closed());
        if senders.is_empty() {
            subscribers.remove(key);
        }
    }
}

/// Per-key fan-out of writes to live subscribers.
///
/// Backends call `publish` while still holding their own write lock, so
/// every subscriber sees writes to a key in the order they were applied.
#[derive(Default)]
pub struct WatchHub {
    subscribers: Arc<Mutex<SubscriberMap>>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::Backend("watch hub lock poisoned".to_string()))?;
        subscribers.entry(key.to_string()).or_default().push(tx);
        Ok(Subscription {
            rx,
            _idle: None,
            release: Some((Arc::downgrade(&self.subscribers), key.to_string())),
        })
    }

    pub fn publish(&self, key: &str, value: &[u8]) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            tracing::error!(key, "watch hub lock poisoned, dropping notification");
            return;
        };
        if let Some(senders) = subscribers.get_mut(key) {
            senders.retain(|s| s.send(value.to_vec()).is_ok());
            if senders.is_empty() {
                subscribers.remove(key);
            }
        }
    }

    /// Keys with at least one subscriber
    pub fn watched_keys(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Live subscribers for `key`
    pub fn subscriber_count(&self, key: &str) -> usize {
        match self.subscribers.lock() {
            Ok(subscribers) => subscribers
                .get(key)
                .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }
}
