// 🗃️ SqliteStore - server-held store that survives restarts
//
// One row per key. Rows older than the TTL are treated as missing on read
// and removed by `purge_expired`. Watchers are notified in-process, so only
// writes made through this handle reach subscribers.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{StateStore, Subscription, WatchHub, DEFAULT_TTL_SECS};
use crate::error::StoreError;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    ttl: chrono::Duration,
    hub: WatchHub,
}

impl SqliteStore {
    /// Open (or create) a store at `path`
    pub fn open(path: &Path, ttl: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, ttl)
    }

    pub fn open_in_memory(ttl: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> Result<Self, StoreError> {
        setup_database(&conn)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Backend(format!("invalid ttl: {}", e)))?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            ttl,
            hub: WatchHub::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))
    }

    fn cutoff(&self) -> String {
        timestamp(Utc::now() - self.ttl)
    }

    /// Delete every expired row, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM kv WHERE updated_at <= ?1", params![self.cutoff()])?;
        if removed > 0 {
            tracing::info!(removed, "purged expired sessions");
        }
        Ok(removed)
    }

    /// Number of rows, expired or not
    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.hub.subscriber_count(key)
    }
}

/// Fixed-width UTC timestamps so they compare correctly as text
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // WAL mode for crash recovery (no-op for in-memory databases)
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value BLOB NOT NULL,
            revision INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_kv_updated_at ON kv(updated_at)",
        [],
    )?;

    Ok(())
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND updated_at > ?2",
                params![key, self.cutoff()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let revision: i64 = conn.query_row(
            "INSERT INTO kv (key, value, revision, updated_at) VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                revision = kv.revision + 1,
                updated_at = excluded.updated_at
             RETURNING revision",
            params![key, value, timestamp(Utc::now())],
            |row| row.get(0),
        )?;

        // Still holding the connection, so notifications follow write order
        self.hub.publish(key, &value);
        Ok(revision as u64)
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError> {
        self.hub.subscribe(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour() -> Duration {
        Duration::from_secs(3600)
    }

    #[tokio::test]
    async fn test_get_put_in_memory() {
        let store = SqliteStore::open_in_memory(hour()).unwrap();

        assert_eq!(store.get("session").await.unwrap(), None);

        assert_eq!(store.put("session", b"one".to_vec()).await.unwrap(), 1);
        assert_eq!(store.put("session", b"two".to_vec()).await.unwrap(), 2);

        assert_eq!(store.get("session").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.count().unwrap(), 1);

        println!("✅ SQLite get/put test PASSED");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("masterscalc.db");

        {
            let store = SqliteStore::open(&path, hour()).unwrap();
            store.put("session", b"roster".to_vec()).await.unwrap();
        }

        let reopened = SqliteStore::open(&path, hour()).unwrap();
        assert_eq!(reopened.get("session").await.unwrap(), Some(b"roster".to_vec()));
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let store = SqliteStore::open_in_memory(Duration::ZERO).unwrap();
        store.put("session", b"gone".to_vec()).await.unwrap();

        assert_eq!(store.get("session").await.unwrap(), None);
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_in_write_order() {
        let store = SqliteStore::open_in_memory(hour()).unwrap();
        let mut sub = store.subscribe("session").await.unwrap();

        store.put("session", b"1".to_vec()).await.unwrap();
        store.put("session", b"2".to_vec()).await.unwrap();

        assert_eq!(sub.next_value().await.unwrap(), b"1".to_vec());
        assert_eq!(sub.next_value().await.unwrap(), b"2".to_vec());
        assert_eq!(store.subscriber_count("session"), 1);
    }
}
