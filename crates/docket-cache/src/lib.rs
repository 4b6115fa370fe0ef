//! Content-addressed result cache.
//!
//! Results of expensive operations (analysis, transcription) are keyed by
//! the operation, the hash of the input content and the options that shaped
//! the output. Entries live in a bounded LRU with per-entry TTL, and may be
//! mirrored to a durable store through [`CachePersistence`].

pub mod cache;
pub mod error;
pub mod key;
mod lru;
pub mod metrics;
pub mod persistence;

pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use error::{CacheError, CacheResult};
pub use key::create_key;
pub use persistence::{CachePersistence, PersistedEntry};
