//! Storage seams shared by the worker and its deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_models::{
    Document, DocumentId, DocumentStatus, Extraction, Job, JobId, LeaseId, NewJob,
};

use crate::error::QueueResult;

/// Shared, durable job table.
///
/// Every state change is a single conditional update: it applies only when
/// the job is in the expected status, and otherwise fails with
/// [`QueueError::InvalidTransition`](crate::QueueError::InvalidTransition).
/// Transitions out of `processing` are also fenced on the lease written by
/// [`JobStore::try_claim`]; a stale holder gets
/// [`QueueError::LeaseLost`](crate::QueueError::LeaseLost).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job.
    async fn enqueue(&self, job: NewJob) -> QueueResult<Job>;

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Highest-priority pending job, oldest first among equals.
    async fn find_next_pending(&self) -> QueueResult<Option<Job>>;

    /// Atomically move a job from `pending` to `processing` under `lease`.
    ///
    /// Returns `false` when the job is no longer pending; among concurrent
    /// callers for the same job exactly one gets `true`.
    async fn try_claim(&self, id: &JobId, lease: &LeaseId, now: DateTime<Utc>)
        -> QueueResult<bool>;

    /// `processing -> complete`.
    async fn complete(&self, id: &JobId, lease: &LeaseId, now: DateTime<Utc>)
        -> QueueResult<()>;

    /// `processing -> pending`, recording the attempt count and last error.
    /// Releases the lease.
    async fn requeue(
        &self,
        id: &JobId,
        lease: &LeaseId,
        attempts: u32,
        error: &str,
    ) -> QueueResult<()>;

    /// `processing -> failed`.
    async fn fail(
        &self,
        id: &JobId,
        lease: &LeaseId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<()>;

    /// Jobs still `processing` that were claimed before `started_before`.
    async fn expired_leases(&self, started_before: DateTime<Utc>) -> QueueResult<Vec<Job>>;
}

/// Document rows updated as jobs make progress.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, document: Document) -> QueueResult<()>;

    async fn get(&self, id: &DocumentId) -> QueueResult<Option<Document>>;

    /// Store extracted text, its chunks and the raw content hash.
    async fn save_extraction(
        &self,
        id: &DocumentId,
        extraction: &Extraction,
        content_hash: &str,
    ) -> QueueResult<()>;

    async fn save_analysis(&self, id: &DocumentId, analysis: &serde_json::Value)
        -> QueueResult<()>;

    async fn save_transcript(
        &self,
        id: &DocumentId,
        transcript: &str,
        content_hash: &str,
    ) -> QueueResult<()>;

    /// Progress percentage, clamped to 100.
    async fn set_progress(&self, id: &DocumentId, progress: u8) -> QueueResult<()>;

    async fn set_status(&self, id: &DocumentId, status: DocumentStatus) -> QueueResult<()>;

    /// Mark failed with a user-visible message.
    async fn mark_failed(&self, id: &DocumentId, message: &str) -> QueueResult<()>;
}
