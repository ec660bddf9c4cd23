//! Cache store adapters.
//!
//! The store is injected behind [`CacheStore`] so the middleware, the
//! invalidation API, and the warmer never touch a concrete backend.
//! [`RedisStore`] is the production backend; [`MemoryStore`] backs tests and
//! deployments without a Redis.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store operation failed: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Key→value store with per-key expiration, pattern enumeration, and
/// deletion.
///
/// Implementations must be safe to share across request workers; per-key
/// operations are atomic on the backend, so callers need no locking.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value at `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write `value` at `key`, replacing any previous value, expiring after
    /// `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Delete every key matching the glob `pattern`. Returns the number of
    /// keys removed; an empty match is 0, not an error.
    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64>;

    /// Number of live keys in the store.
    async fn key_count(&self) -> StoreResult<u64>;

    /// Opaque memory diagnostic blob, for observability only.
    async fn memory_stats(&self) -> StoreResult<String>;

    /// Remove keys that were written without an expiration. Defensive
    /// cleanup against misconfigured writers; returns the number removed.
    async fn remove_unexpiring(&self) -> StoreResult<u64>;
}

// ============================================================================
// Stored envelope
// ============================================================================

/// Serialized response payload stored at a cache key.
///
/// Entries are written whole and replaced whole, never mutated in place. The
/// body travels base64-encoded inside a JSON envelope so the store only ever
/// sees opaque bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub content_type: Option<String>,
    body: String,
}

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("entry envelope is not valid JSON: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("entry body is not valid base64: {0}")]
    Body(#[from] base64::DecodeError),
}

impl CacheEntry {
    pub fn new(status: u16, content_type: Option<String>, body: &[u8]) -> Self {
        Self {
            status,
            content_type,
            body: BASE64.encode(body),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EntryError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, EntryError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn body_bytes(&self) -> Result<Vec<u8>, EntryError> {
        Ok(BASE64.decode(&self.body)?)
    }
}

// ============================================================================
// Redis store
// ============================================================================

/// Redis-backed store over a multiplexed, auto-reconnecting connection.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client =
            redis::Client::open(url).map_err(|err| StoreError::Connection(err.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let removed: u64 = conn.del(&keys).await?;
        Ok(removed)
    }

    async fn key_count(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(count)
    }

    async fn memory_stats(&self) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await?;
        Ok(info)
    }

    async fn remove_unexpiring(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys("*").await?;

        let mut removed = 0u64;
        for key in keys {
            let ttl: i64 = conn.ttl(&key).await?;
            if ttl == -1 {
                let count: u64 = conn.del(&key).await?;
                removed += count;
            }
        }
        Ok(removed)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

struct MemoryEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-process store with per-entry deadlines and glob matching.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry with no expiration. Exists so tests and diagnostics
    /// can exercise [`CacheStore::remove_unexpiring`]; the caching paths
    /// always write through `set_with_ttl`.
    pub async fn insert_without_ttl(&self, key: &str, value: &[u8]) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                data: value.to_vec(),
                expires_at: None,
            },
        );
    }

    fn pattern_matches(pattern: &str, key: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return key.starts_with(prefix);
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            return key.ends_with(suffix);
        }
        pattern == key
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.write().await;

        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.data.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                data: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64> {
        let mut entries = self.entries.write().await;

        let matching: Vec<String> = entries
            .keys()
            .filter(|key| Self::pattern_matches(pattern, key))
            .cloned()
            .collect();

        for key in &matching {
            entries.remove(key);
        }
        Ok(matching.len() as u64)
    }

    async fn key_count(&self) -> StoreResult<u64> {
        let entries = self.entries.read().await;
        let live = entries.values().filter(|entry| !entry.is_expired()).count();
        Ok(live as u64)
    }

    async fn memory_stats(&self) -> StoreResult<String> {
        let entries = self.entries.read().await;
        let bytes: usize = entries.values().map(|entry| entry.data.len()).sum();
        Ok(format!("entries={} payload_bytes={}", entries.len(), bytes))
    }

    async fn remove_unexpiring(&self) -> StoreResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at.is_some());
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();

        assert!(store.get("menu:GET:/a::anonymous").await.unwrap().is_none());

        store
            .set_with_ttl("menu:GET:/a::anonymous", b"payload", Duration::from_secs(60))
            .await
            .unwrap();

        let value = store.get("menu:GET:/a::anonymous").await.unwrap();
        assert_eq!(value.as_deref(), Some(b"payload".as_slice()));
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let store = MemoryStore::new();
        store
            .set_with_ttl(
                "search:GET:/s:q=a:anonymous",
                b"x",
                Duration::from_millis(40),
            )
            .await
            .unwrap();

        assert!(
            store
                .get("search:GET:/s:q=a:anonymous")
                .await
                .unwrap()
                .is_some()
        );

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(
            store
                .get("search:GET:/s:q=a:anonymous")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.key_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_matching_supports_prefix_and_suffix_globs() {
        let store = MemoryStore::new();
        for key in [
            "menu:GET:/menu/category/1::anonymous",
            "menu:GET:/menu/category/2::anonymous",
            "search:GET:/menu/search:q=taco:user-9",
        ] {
            store
                .set_with_ttl(key, b"v", Duration::from_secs(60))
                .await
                .unwrap();
        }

        assert_eq!(store.delete_matching("menu:*").await.unwrap(), 2);
        assert_eq!(store.delete_matching("menu:*").await.unwrap(), 0);
        assert_eq!(store.delete_matching("*:user-9").await.unwrap(), 1);
        assert_eq!(store.key_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_unexpiring_only_touches_persistent_keys() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("api:GET:/x::anonymous", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        store.insert_without_ttl("api:stray", b"v").await;
        store.insert_without_ttl("menu:stray", b"v").await;

        assert_eq!(store.remove_unexpiring().await.unwrap(), 2);
        assert_eq!(store.remove_unexpiring().await.unwrap(), 0);
        assert!(store.get("api:GET:/x::anonymous").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_stats_reports_entry_count() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("menu:a", b"12345", Duration::from_secs(60))
            .await
            .unwrap();

        let stats = store.memory_stats().await.unwrap();
        assert!(stats.contains("entries=1"));
        assert!(stats.contains("payload_bytes=5"));
    }

    #[test]
    fn entry_envelope_roundtrips_bytes_exactly() {
        let body = b"{\"success\":true}\xf0\x9f\x8c\xae";
        let entry = CacheEntry::new(200, Some("application/json".to_string()), body);

        let encoded = entry.encode().unwrap();
        let decoded = CacheEntry::decode(&encoded).unwrap();

        assert_eq!(decoded.status, 200);
        assert_eq!(decoded.content_type.as_deref(), Some("application/json"));
        assert_eq!(decoded.body_bytes().unwrap(), body);
    }

    #[test]
    fn malformed_envelope_is_a_decode_error() {
        assert!(matches!(
            CacheEntry::decode(b"not json"),
            Err(EntryError::Envelope(_))
        ));
    }
}
