//! In-process stores for development and tests.

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_models::{
    Document, DocumentId, DocumentStatus, Extraction, Job, JobId, JobStatus, LeaseId, NewJob,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::store::{DocumentStore, JobStore};

struct JobRow {
    /// Insertion order, tie-breaker for equal timestamps
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct JobTable {
    rows: HashMap<JobId, JobRow>,
    next_seq: u64,
}

impl JobTable {
    /// Apply `update` to a processing job still held under `lease`.
    fn transition(
        &mut self,
        id: &JobId,
        lease: &LeaseId,
        to: JobStatus,
        update: impl FnOnce(&mut Job),
    ) -> QueueResult<()> {
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| QueueError::job_not_found(id.as_str()))?;

        let from = JobStatus::Processing;
        if row.job.status != from || !from.can_transition_to(to) {
            return Err(QueueError::invalid_transition(
                id.as_str(),
                row.job.status.as_str(),
                to,
            ));
        }
        if row.job.lease_id.as_ref() != Some(lease) {
            return Err(QueueError::lease_lost(id.as_str()));
        }

        row.job.status = to;
        update(&mut row.job);
        Ok(())
    }
}

/// Job store guarded by a single mutex; claims are compare-and-set under it.
#[derive(Default)]
pub struct InMemoryJobStore {
    table: Mutex<JobTable>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, in insertion order.
    pub fn all(&self) -> Vec<Job> {
        let table = self.table.lock();
        let mut rows: Vec<&JobRow> = table.rows.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.job.clone()).collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> QueueResult<Job> {
        let job = job.into_job(Utc::now());
        let mut table = self.table.lock();
        let seq = table.next_seq;
        table.next_seq += 1;
        table.rows.insert(
            job.id.clone(),
            JobRow {
                seq,
                job: job.clone(),
            },
        );
        debug!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.table.lock().rows.get(id).map(|row| row.job.clone()))
    }

    async fn find_next_pending(&self) -> QueueResult<Option<Job>> {
        let table = self.table.lock();
        Ok(table
            .rows
            .values()
            .filter(|row| row.job.status == JobStatus::Pending)
            .min_by_key(|row| (Reverse(row.job.priority), row.job.created_at, row.seq))
            .map(|row| row.job.clone()))
    }

    async fn try_claim(
        &self,
        id: &JobId,
        lease: &LeaseId,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut table = self.table.lock();
        let Some(row) = table.rows.get_mut(id) else {
            return Ok(false);
        };
        if row.job.status != JobStatus::Pending {
            return Ok(false);
        }
        row.job.status = JobStatus::Processing;
        row.job.started_at = Some(now);
        row.job.lease_id = Some(lease.clone());
        Ok(true)
    }

    async fn complete(&self, id: &JobId, lease: &LeaseId, now: DateTime<Utc>) -> QueueResult<()> {
        self.table
            .lock()
            .transition(id, lease, JobStatus::Complete, |job| {
                job.completed_at = Some(now);
                job.error_message = None;
            })
    }

    async fn requeue(
        &self,
        id: &JobId,
        lease: &LeaseId,
        attempts: u32,
        error: &str,
    ) -> QueueResult<()> {
        self.table
            .lock()
            .transition(id, lease, JobStatus::Pending, |job| {
                job.attempts = attempts;
                job.error_message = Some(error.to_string());
                job.started_at = None;
                job.lease_id = None;
            })
    }

    async fn fail(
        &self,
        id: &JobId,
        lease: &LeaseId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.table
            .lock()
            .transition(id, lease, JobStatus::Failed, |job| {
                job.attempts = attempts;
                job.error_message = Some(error.to_string());
                job.completed_at = Some(now);
            })
    }

    async fn expired_leases(&self, started_before: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let table = self.table.lock();
        Ok(table
            .rows
            .values()
            .filter(|row| row.job.status == JobStatus::Processing)
            .filter(|row| row.job.started_at.is_some_and(|t| t < started_before))
            .map(|row| row.job.clone())
            .collect())
    }
}

/// Document store backed by a map.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<DocumentId, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, id: &DocumentId, apply: impl FnOnce(&mut Document)) -> QueueResult<()> {
        let mut documents = self.documents.lock();
        let document = documents
            .get_mut(id)
            .ok_or_else(|| QueueError::document_not_found(id.as_str()))?;
        apply(document);
        document.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, document: Document) -> QueueResult<()> {
        self.documents.lock().insert(document.id.clone(), document);
        Ok(())
    }

    async fn get(&self, id: &DocumentId) -> QueueResult<Option<Document>> {
        Ok(self.documents.lock().get(id).cloned())
    }

    async fn save_extraction(
        &self,
        id: &DocumentId,
        extraction: &Extraction,
        content_hash: &str,
    ) -> QueueResult<()> {
        self.update(id, |doc| {
            doc.extracted_text = Some(extraction.text.clone());
            doc.chunks = extraction.chunks.clone();
            doc.content_hash = Some(content_hash.to_string());
        })
    }

    async fn save_analysis(
        &self,
        id: &DocumentId,
        analysis: &serde_json::Value,
    ) -> QueueResult<()> {
        self.update(id, |doc| doc.analysis = Some(analysis.clone()))
    }

    async fn save_transcript(
        &self,
        id: &DocumentId,
        transcript: &str,
        content_hash: &str,
    ) -> QueueResult<()> {
        self.update(id, |doc| {
            doc.transcript = Some(transcript.to_string());
            doc.content_hash = Some(content_hash.to_string());
        })
    }

    async fn set_progress(&self, id: &DocumentId, progress: u8) -> QueueResult<()> {
        self.update(id, |doc| doc.progress = progress.min(100))
    }

    async fn set_status(&self, id: &DocumentId, status: DocumentStatus) -> QueueResult<()> {
        self.update(id, |doc| {
            doc.status = status;
            if status != DocumentStatus::Failed {
                doc.error_message = None;
            }
        })
    }

    async fn mark_failed(&self, id: &DocumentId, message: &str) -> QueueResult<()> {
        self.update(id, |doc| {
            doc.status = DocumentStatus::Failed;
            doc.error_message = Some(message.to_string());
        })
    }
}
