//! Operator-facing cache diagnostics and cleanup.

use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;

use super::{middleware::CacheState, store::StoreResult};

/// Point-in-time store diagnostics. `memory_usage` is an opaque blob from
/// the backend (raw `INFO memory` text on Redis).
#[derive(Debug, Serialize)]
pub struct CacheDiagnostics {
    pub memory_usage: String,
    pub key_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl CacheState {
    pub async fn diagnostics(&self) -> StoreResult<CacheDiagnostics> {
        let memory_usage = self.store.memory_stats().await?;
        let key_count = self.store.key_count().await?;

        Ok(CacheDiagnostics {
            memory_usage,
            key_count,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    /// Remove keys that were written without an expiration. The store expires
    /// TTL-bearing keys on its own; this only sweeps up misconfigured writes.
    pub async fn cleanup(&self) -> StoreResult<u64> {
        let removed = self.store.remove_unexpiring().await?;
        info!(removed, "cache cleanup completed");
        Ok(removed)
    }
}
