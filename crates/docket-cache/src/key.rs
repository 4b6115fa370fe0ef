//! Content-addressed cache keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Derive a cache key from an operation, the content hash of its input and
/// the options that shape its output.
///
/// Options are serialized with `serde_json`, whose maps are key-sorted, so
/// two structurally equal option values always produce the same key.
/// Options that fail to serialize contribute `null`.
pub fn create_key<O: Serialize + ?Sized>(operation: &str, content_hash: &str, options: &O) -> String {
    let options = serde_json::to_value(options)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| "null".to_string());

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b"\n");
    hasher.update(content_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(options.as_bytes());
    format!("{:x}", hasher.finalize())
}
