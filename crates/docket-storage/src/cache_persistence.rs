//! Result-cache persistence in R2.
//!
//! Each entry is a gzip-compressed JSON envelope at
//! `{prefix}/{key}.json.gz`. Corrupt and expired envelopes read as misses.

use std::io::{Read, Write};

use async_trait::async_trait;
use chrono::Utc;
use docket_cache::{CacheError, CachePersistence, CacheResult, PersistedEntry};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::client::R2Client;
use crate::error::{StorageError, StorageResult};

/// Content type for gzip-compressed JSON.
const CONTENT_TYPE_GZIP: &str = "application/gzip";

/// Default key prefix for cache envelopes.
pub const DEFAULT_CACHE_PREFIX: &str = "cache/results";

/// R2 key for a cache entry.
pub fn cache_object_key(prefix: &str, key: &str) -> String {
    format!("{}/{}.json.gz", prefix.trim_end_matches('/'), key)
}

/// Serialize and gzip an entry.
pub fn encode_envelope(entry: &PersistedEntry) -> StorageResult<Vec<u8>> {
    let json = serde_json::to_vec(entry)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| StorageError::Serialization(format!("Failed to gzip cache entry: {}", e)))?;

    encoder.finish().map_err(|e| {
        StorageError::Serialization(format!("Failed to finish gzip encoding: {}", e))
    })
}

/// Decompress and parse an envelope.
///
/// Returns `None` for corrupt data (treated as a cache miss).
pub fn decode_envelope(data: &[u8]) -> Option<PersistedEntry> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();

    if let Err(e) = decoder.read_to_end(&mut json) {
        warn!(error = %e, "Failed to decompress cache envelope");
        return None;
    }

    match serde_json::from_slice(&json) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(error = %e, "Failed to parse cache envelope");
            None
        }
    }
}

fn to_cache_error(e: StorageError) -> CacheError {
    CacheError::persistence(e.to_string())
}

/// [`CachePersistence`] adapter storing envelopes in an R2 bucket.
pub struct R2CachePersistence {
    client: R2Client,
    prefix: String,
}

impl R2CachePersistence {
    pub fn new(client: R2Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn object_key(&self, key: &str) -> String {
        cache_object_key(&self.prefix, key)
    }
}

#[async_trait]
impl CachePersistence for R2CachePersistence {
    async fn load(&self, key: &str) -> CacheResult<Option<PersistedEntry>> {
        let object_key = self.object_key(key);

        let data = match self.client.download_bytes(&object_key).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => {
                debug!(key = %object_key, "Cache envelope not found");
                return Ok(None);
            }
            Err(e) => return Err(to_cache_error(e)),
        };

        let Some(entry) = decode_envelope(&data) else {
            return Ok(None);
        };

        if entry.is_expired_at(Utc::now()) {
            debug!(key = %object_key, "Cache envelope expired");
            return Ok(None);
        }

        Ok(Some(entry))
    }

    async fn store(&self, key: &str, entry: &PersistedEntry) -> CacheResult<()> {
        let object_key = self.object_key(key);
        let compressed = encode_envelope(entry).map_err(to_cache_error)?;

        debug!(key = %object_key, compressed_size = compressed.len(), "Storing cache envelope");

        self.client
            .upload_bytes(compressed, &object_key, CONTENT_TYPE_GZIP)
            .await
            .map_err(to_cache_error)
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.client
            .delete_object(&self.object_key(key))
            .await
            .map_err(to_cache_error)
    }

    async fn clear(&self) -> CacheResult<()> {
        let prefix = format!("{}/", self.prefix.trim_end_matches('/'));
        let keys = self.client.list_keys(&prefix).await.map_err(to_cache_error)?;
        self.client
            .delete_objects(&keys)
            .await
            .map(|_| ())
            .map_err(to_cache_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> PersistedEntry {
        PersistedEntry {
            value: json!({"summary": "Witness timeline is inconsistent", "relevance": 0.8}),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_cache_object_key() {
        assert_eq!(cache_object_key("cache/results", "ab12"), "cache/results/ab12.json.gz");
        assert_eq!(cache_object_key("cache/", "ab12"), "cache/ab12.json.gz");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let original = entry();
        let compressed = encode_envelope(&original).expect("encode should succeed");
        assert_eq!(compressed[..2], [0x1f, 0x8b]);
        assert_eq!(decode_envelope(&compressed), Some(original));
    }

    #[test]
    fn test_corrupt_envelope_is_a_miss() {
        assert!(decode_envelope(b"not gzip data at all").is_none());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{not json").unwrap();
        let gzipped_garbage = encoder.finish().unwrap();
        assert!(decode_envelope(&gzipped_garbage).is_none());
    }
}
