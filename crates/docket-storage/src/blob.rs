//! Blob store seam and an in-memory implementation.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};

/// Inclusive byte range, as in an HTTP `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Last byte (inclusive); `None` reads to the end
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Value for an HTTP `Range` header.
    pub fn to_header(&self) -> String {
        self.to_string()
    }

    /// Resolve against an object length into a slice range.
    fn resolve(&self, len: u64) -> StorageResult<std::ops::Range<usize>> {
        let end = self.end.map_or(len, |end| end.saturating_add(1).min(len));
        if self.start >= len || self.start >= end {
            return Err(StorageError::InvalidRange {
                range: self.to_string(),
                size: len,
            });
        }
        Ok(self.start as usize..end as usize)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{}", self.start, end),
            None => write!(f, "bytes={}-", self.start),
        }
    }
}

/// Object storage holding uploaded evidence files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object, or part of it.
    async fn download(&self, path: &str, range: Option<ByteRange>) -> StorageResult<Vec<u8>>;
}

/// Blob store backed by a map, for development and tests.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.objects.write().insert(path.into(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn download(&self, path: &str, range: Option<ByteRange>) -> StorageResult<Vec<u8>> {
        let objects = self.objects.read();
        let bytes = objects
            .get(path)
            .ok_or_else(|| StorageError::not_found(path))?;

        match range {
            Some(range) => Ok(bytes[range.resolve(bytes.len() as u64)?].to_vec()),
            None => Ok(bytes.clone()),
        }
    }
}
