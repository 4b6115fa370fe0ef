//! Blob storage for evidence files and durable cache persistence.
//!
//! Objects live in Cloudflare R2 via its S3-compatible API.

pub mod blob;
pub mod cache_persistence;
pub mod client;
pub mod error;

pub use blob::{BlobStore, ByteRange, InMemoryBlobStore};
pub use cache_persistence::{R2CachePersistence, DEFAULT_CACHE_PREFIX};
pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
