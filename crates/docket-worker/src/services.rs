//! Collaborators injected into the worker.

use std::sync::Arc;

use docket_cache::ResultCache;
use docket_inference::{ExtractionService, InferenceClient};
use docket_media::MediaTranscoder;
use docket_queue::{DocumentStore, JobStore};
use docket_ratelimit::RateLimiter;
use docket_storage::BlobStore;

/// Everything a job needs from the outside world.
#[derive(Clone)]
pub struct WorkerServices {
    pub jobs: Arc<dyn JobStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub inference: Arc<dyn InferenceClient>,
    pub extractor: Arc<dyn ExtractionService>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResultCache<serde_json::Value>>,
    pub transcoder: Arc<MediaTranscoder>,
}
