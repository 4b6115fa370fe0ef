//! Per-type job processing.

mod analyze;
mod extract;
mod prompts;
mod transcribe;

use std::sync::Arc;

use docket_inference::{InferenceRequest, InferenceResponse};
use docket_models::{Document, DocumentId, Job, JobType, NewJob};
use docket_queue::QueueError;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::observer::JobObserver;
use crate::services::WorkerServices;

pub use prompts::{analysis_schema, ANALYSIS_INSTRUCTIONS, TRANSCRIPTION_INSTRUCTIONS};

/// Borrowed view of everything one job attempt needs.
pub(crate) struct JobContext<'a> {
    pub job: &'a Job,
    pub services: &'a WorkerServices,
    pub config: &'a WorkerConfig,
    pub logger: &'a JobLogger,
    pub observers: &'a [Arc<dyn JobObserver>],
}

impl JobContext<'_> {
    pub fn document_id(&self) -> WorkerResult<&DocumentId> {
        self.job
            .document_id
            .as_ref()
            .ok_or_else(|| WorkerError::missing_document(self.job.id.as_str()))
    }

    pub async fn load_document(&self) -> WorkerResult<Document> {
        let id = self.document_id()?;
        self.services
            .documents
            .get(id)
            .await?
            .ok_or_else(|| WorkerError::from(QueueError::document_not_found(id.as_str())))
    }

    /// Persist progress on the document and notify observers. Best-effort.
    pub async fn report_progress(&self, progress: u8) {
        if let Some(id) = &self.job.document_id {
            if let Err(e) = self.services.documents.set_progress(id, progress).await {
                self.logger
                    .log_warning(&format!("Failed to persist progress: {}", e));
            }
        }
        for observer in self.observers {
            observer.on_progress(self.job, progress);
        }
    }

    /// Queue an analyze job for a document whose text just became available.
    pub async fn enqueue_analysis(&self, document_id: &DocumentId) -> WorkerResult<()> {
        if !self.config.auto_analyze_after_extract {
            return Ok(());
        }

        let job = self
            .services
            .jobs
            .enqueue(
                NewJob::new(self.job.project_id.clone(), JobType::Analyze)
                    .for_document(document_id.clone())
                    .with_priority(self.job.priority)
                    .with_options(self.job.options.clone()),
            )
            .await?;
        self.logger
            .log_progress(&format!("Queued analysis job {}", job.id));
        Ok(())
    }

    /// Call the inference client inside the model's rate limit budget.
    ///
    /// Actual usage (or the estimate when the provider reports none) is
    /// charged whether or not the call succeeds.
    pub async fn generate_metered(
        &self,
        request: &InferenceRequest,
        estimate: u64,
    ) -> WorkerResult<InferenceResponse> {
        let limiter = &self.services.limiter;
        let max_wait = self.config.rate_limit_max_wait;

        if !limiter
            .wait_for_tokens(&request.model, estimate, max_wait)
            .await
        {
            return Err(WorkerError::quota_exceeded(format!(
                "no {} budget for {} units within {}s",
                request.model,
                estimate,
                max_wait.as_secs()
            )));
        }

        let result = self.services.inference.generate(request).await;
        let used = result
            .as_ref()
            .ok()
            .and_then(|r| r.usage)
            .unwrap_or(estimate);
        limiter.consume(&request.model, used);

        Ok(result?)
    }
}

/// Run the processor for the job's type.
pub(crate) async fn run(ctx: &JobContext<'_>) -> WorkerResult<()> {
    match ctx.job.job_type {
        JobType::Extract => extract::run(ctx).await,
        JobType::Analyze => analyze::run(ctx).await,
        JobType::Transcribe => transcribe::run(ctx).await,
    }
}
