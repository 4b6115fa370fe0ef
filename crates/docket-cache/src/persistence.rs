//! Durable backing store seam for [`ResultCache`](crate::ResultCache).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;

/// A cache entry as handed to an adapter.
///
/// Expiry is wall-clock so it survives process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub value: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl PersistedEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Adapter that persists cache entries beyond the process.
///
/// Implementations may fail freely; the cache logs and ignores errors.
#[async_trait]
pub trait CachePersistence: Send + Sync {
    async fn load(&self, key: &str) -> CacheResult<Option<PersistedEntry>>;

    async fn store(&self, key: &str, entry: &PersistedEntry) -> CacheResult<()>;

    async fn remove(&self, key: &str) -> CacheResult<()>;

    async fn clear(&self) -> CacheResult<()>;
}
