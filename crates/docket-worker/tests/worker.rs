//! End-to-end job processing against in-memory stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

use docket_cache::{create_key, CacheConfig, ResultCache};
use docket_inference::{
    ExtractionService, InferenceClient, InferenceContent, InferenceError, InferenceRequest,
    InferenceResponse, InferenceResult, PlainTextExtractor,
};
use docket_media::{MediaTranscoder, TranscoderConfig};
use docket_models::{
    content_hash, AnalysisOptions, Document, DocumentStatus, Extraction, Job, JobStatus, JobType,
    LeaseId, NewJob, ProjectId,
};
use docket_queue::{DocumentStore, InMemoryDocumentStore, InMemoryJobStore, JobStore};
use docket_ratelimit::{RateLimitConfig, RateLimiter, ResourceLimit};
use docket_storage::InMemoryBlobStore;
use docket_worker::{
    JobObserver, JobOutcome, JobWorker, WorkerConfig, WorkerServices, LEASE_EXPIRED_MESSAGE,
};

const MODEL: &str = "gemini-2.5-flash";

type Reply = Box<dyn Fn(&InferenceRequest) -> InferenceResult<InferenceResponse> + Send + Sync>;

/// Inference client answering from a closure and recording every request.
struct ScriptedInference {
    reply: Reply,
    requests: Mutex<Vec<InferenceRequest>>,
    delay: Option<Duration>,
}

impl ScriptedInference {
    fn new(
        reply: impl Fn(&InferenceRequest) -> InferenceResult<InferenceResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer only after `delay`.
    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn json(value: Value, usage: u64) -> Self {
        Self::new(move |_| {
            Ok(InferenceResponse {
                text: value.to_string(),
                json: Some(value.clone()),
                usage: Some(usage),
            })
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.reply)(request)
    }
}

/// Extractor that always fails with the same message.
struct FailingExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl ExtractionService for FailingExtractor {
    async fn extract_text(&self, _: &[u8], _: &str, _: &str) -> InferenceResult<Extraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(InferenceError::service("boom"))
    }
}

/// Extractor whose task dies mid-job.
struct PanickingExtractor;

#[async_trait]
impl ExtractionService for PanickingExtractor {
    async fn extract_text(&self, _: &[u8], _: &str, _: &str) -> InferenceResult<Extraction> {
        panic!("extractor crashed");
    }
}

#[derive(Default)]
struct RecordingObserver {
    progress: Mutex<Vec<u8>>,
    completed: AtomicUsize,
    errors: Mutex<Vec<(String, bool)>>,
}

impl JobObserver for RecordingObserver {
    fn on_progress(&self, _job: &Job, progress: u8) {
        self.progress.lock().push(progress);
    }

    fn on_complete(&self, _job: &Job) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _job: &Job, error: &str, will_retry: bool) {
        self.errors.lock().push((error.to_string(), will_retry));
    }
}

struct Harness {
    jobs: Arc<InMemoryJobStore>,
    documents: Arc<InMemoryDocumentStore>,
    blobs: Arc<InMemoryBlobStore>,
    inference: Arc<ScriptedInference>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache<Value>>,
    services: WorkerServices,
    config: WorkerConfig,
    worker: JobWorker,
}

struct HarnessBuilder {
    config: WorkerConfig,
    inference: ScriptedInference,
    extractor: Arc<dyn ExtractionService>,
    limits: RateLimitConfig,
}

impl HarnessBuilder {
    fn new() -> Self {
        let mut config = WorkerConfig::default();
        config.poll_interval = Duration::from_millis(10);
        config.analysis_model = MODEL.to_string();
        config.transcription_model = MODEL.to_string();
        config.rate_limit_max_wait = Duration::from_secs(5);
        config.media = TranscoderConfig {
            program: "docket-test-missing-transcoder".to_string(),
            ..TranscoderConfig::default()
        };

        Self {
            config,
            inference: ScriptedInference::json(json!({"summary": "unused"}), 1),
            extractor: Arc::new(PlainTextExtractor::default()),
            limits: RateLimitConfig::default()
                .with_limit(MODEL, ResourceLimit::new(10, 1_000_000)),
        }
    }

    fn config(mut self, apply: impl FnOnce(&mut WorkerConfig)) -> Self {
        apply(&mut self.config);
        self
    }

    fn inference(mut self, inference: ScriptedInference) -> Self {
        self.inference = inference;
        self
    }

    fn extractor(mut self, extractor: Arc<dyn ExtractionService>) -> Self {
        self.extractor = extractor;
        self
    }

    fn limit(mut self, limit: ResourceLimit) -> Self {
        self.limits = self.limits.with_limit(MODEL, limit);
        self
    }

    fn build(self) -> Harness {
        let jobs = Arc::new(InMemoryJobStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let inference = Arc::new(self.inference);
        let limiter = Arc::new(RateLimiter::new(self.limits));
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));

        let services = WorkerServices {
            jobs: jobs.clone(),
            documents: documents.clone(),
            blobs: blobs.clone(),
            inference: inference.clone(),
            extractor: self.extractor,
            limiter: limiter.clone(),
            cache: cache.clone(),
            transcoder: Arc::new(MediaTranscoder::new(self.config.media.clone())),
        };

        Harness {
            jobs,
            documents,
            blobs,
            inference,
            limiter,
            cache,
            services: services.clone(),
            config: self.config.clone(),
            worker: JobWorker::new(self.config, services),
        }
    }
}

impl Harness {
    /// Another worker process sharing the same stores.
    fn peer(&self, apply: impl FnOnce(&mut WorkerConfig)) -> JobWorker {
        let mut config = self.config.clone();
        apply(&mut config);
        JobWorker::new(config, self.services.clone())
    }

    /// Insert a document whose bytes are in the blob store.
    async fn upload(&self, filename: &str, mime: &str, bytes: &[u8]) -> Document {
        let path = format!("projects/p1/{}", filename);
        self.blobs.insert(path.clone(), bytes.to_vec());
        let document = Document::new(
            ProjectId::from_string("p1"),
            filename,
            mime,
            path,
            bytes.len() as u64,
        );
        self.documents.insert(document.clone()).await.unwrap();
        document
    }

    async fn enqueue(&self, job_type: JobType, document: &Document) -> Job {
        self.jobs
            .enqueue(
                NewJob::new(document.project_id.clone(), job_type)
                    .for_document(document.id.clone()),
            )
            .await
            .unwrap()
    }

    async fn claim_and_process(&self) -> JobOutcome {
        let job = self
            .worker
            .acquire_job()
            .await
            .unwrap()
            .expect("a pending job");
        self.worker.process_job(&job).await.unwrap()
    }

    async fn job(&self, job: &Job) -> Job {
        self.jobs.get(&job.id).await.unwrap().unwrap()
    }

    async fn document(&self, document: &Document) -> Document {
        self.documents.get(&document.id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_always_failing_job_fails_after_max_attempts() {
    let extractor = Arc::new(FailingExtractor {
        calls: AtomicUsize::new(0),
    });
    let h = HarnessBuilder::new().extractor(extractor.clone()).build();
    let observer = Arc::new(RecordingObserver::default());
    h.worker.add_observer(observer.clone());

    let document = h.upload("memo.txt", "text/plain", b"hello").await;
    let job = h.enqueue(JobType::Extract, &document).await;
    assert_eq!(job.max_attempts, 3);

    assert_eq!(h.claim_and_process().await, JobOutcome::Retrying);
    assert_eq!(h.job(&job).await.status, JobStatus::Pending);
    assert_eq!(h.claim_and_process().await, JobOutcome::Retrying);
    assert_eq!(h.claim_and_process().await, JobOutcome::Failed);

    let job = h.job(&job).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.error_message.as_deref(), Some("boom"));
    assert!(job.completed_at.is_some());

    let document = h.document(&document).await;
    assert_eq!(document.status, DocumentStatus::Failed);
    assert_eq!(document.error_message.as_deref(), Some("boom"));

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    assert!(h.worker.acquire_job().await.unwrap().is_none());

    let errors = observer.errors.lock().clone();
    assert_eq!(
        errors,
        vec![
            ("boom".to_string(), true),
            ("boom".to_string(), true),
            ("boom".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_extract_saves_text_and_queues_analysis() {
    let h = HarnessBuilder::new().build();
    let observer = Arc::new(RecordingObserver::default());
    h.worker.add_observer(observer.clone());

    let bytes = b"First paragraph.\n\nSecond paragraph.";
    let document = h.upload("memo.txt", "text/plain", bytes).await;
    let job = h.enqueue(JobType::Extract, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);

    let stored = h.document(&document).await;
    assert_eq!(stored.status, DocumentStatus::Complete);
    assert_eq!(
        stored.extracted_text.as_deref(),
        Some("First paragraph.\n\nSecond paragraph.")
    );
    assert_eq!(stored.chunks.len(), 1);
    assert_eq!(stored.content_hash, Some(content_hash(bytes)));
    assert_eq!(stored.progress, 100);

    assert_eq!(h.job(&job).await.status, JobStatus::Complete);

    let follow_up: Vec<Job> = h
        .jobs
        .all()
        .into_iter()
        .filter(|j| j.job_type == JobType::Analyze)
        .collect();
    assert_eq!(follow_up.len(), 1);
    assert_eq!(follow_up[0].status, JobStatus::Pending);
    assert_eq!(follow_up[0].document_id.as_ref(), Some(&document.id));

    assert_eq!(observer.progress.lock().last(), Some(&100));
    assert_eq!(observer.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_extract_without_auto_analyze() {
    let h = HarnessBuilder::new()
        .config(|c| c.auto_analyze_after_extract = false)
        .build();
    let document = h.upload("memo.txt", "text/plain", b"text").await;
    h.enqueue(JobType::Extract, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);
    assert_eq!(h.jobs.all().len(), 1);
}

#[tokio::test]
async fn test_unsupported_format_fails_on_first_attempt() {
    let h = HarnessBuilder::new().build();
    let document = h.upload("brief.pdf", "application/pdf", b"%PDF-1.7").await;
    let job = h.enqueue(JobType::Extract, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Failed);
    let job = h.job(&job).await;
    assert_eq!(job.attempts, 1);
    assert_eq!(h.document(&document).await.status, DocumentStatus::Failed);
}

async fn extracted_document(h: &Harness, text: &str) -> Document {
    let document = h.upload("memo.txt", "text/plain", text.as_bytes()).await;
    let extraction = Extraction {
        text: text.to_string(),
        chunks: Vec::new(),
        metadata: Value::Null,
    };
    h.documents
        .save_extraction(&document.id, &extraction, &content_hash(text.as_bytes()))
        .await
        .unwrap();
    document
}

#[tokio::test(start_paused = true)]
async fn test_analyze_cache_hit_skips_limiter_and_inference() {
    let h = HarnessBuilder::new().build();
    let document = extracted_document(&h, "The contract was signed on May 2.").await;

    let cached = json!({"summary": "from cache"});
    let key = create_key(
        "analyze",
        &content_hash("The contract was signed on May 2.".as_bytes()),
        &AnalysisOptions::default(),
    );
    h.cache.set(key, cached.clone()).await;

    let job = h.enqueue(JobType::Analyze, &document).await;
    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);

    assert_eq!(h.inference.calls(), 0);
    let snapshot = h.limiter.snapshot(MODEL);
    assert_eq!(snapshot.available_requests, 10);
    assert_eq!(snapshot.available_units, 1_000_000);

    assert_eq!(h.document(&document).await.analysis, Some(cached));
    assert_eq!(h.job(&job).await.status, JobStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_analyze_miss_calls_inference_and_caches() {
    let analysis = json!({"summary": "signed contract", "relevance_score": 7});
    let h = HarnessBuilder::new()
        .inference(ScriptedInference::json(analysis.clone(), 1200))
        .build();
    let document = extracted_document(&h, "The contract was signed on May 2.").await;

    h.jobs
        .enqueue(
            NewJob::new(document.project_id.clone(), JobType::Analyze)
                .for_document(document.id.clone())
                .with_options(json!({"perspective": "plaintiff"})),
        )
        .await
        .unwrap();
    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);

    assert_eq!(h.inference.calls(), 1);
    {
        let requests = h.inference.requests.lock();
        let request = &requests[0];
        assert_eq!(request.model, MODEL);
        assert!(request.schema.is_some());
        match &request.content {
            InferenceContent::Text(prompt) => {
                assert!(prompt.contains("Review perspective: plaintiff"));
                assert!(prompt.contains("signed on May 2"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    let snapshot = h.limiter.snapshot(MODEL);
    assert_eq!(snapshot.available_requests, 9);
    assert_eq!(snapshot.available_units, 1_000_000 - 1200);

    assert_eq!(h.document(&document).await.analysis, Some(analysis.clone()));
    assert_eq!(h.cache.len(), 1);

    // Same content and options again: answered from the cache.
    h.jobs
        .enqueue(
            NewJob::new(document.project_id.clone(), JobType::Analyze)
                .for_document(document.id.clone())
                .with_options(json!({"perspective": "plaintiff"})),
        )
        .await
        .unwrap();
    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);
    assert_eq!(h.inference.calls(), 1);

    // A different perspective is a different result.
    h.jobs
        .enqueue(
            NewJob::new(document.project_id.clone(), JobType::Analyze)
                .for_document(document.id.clone())
                .with_options(json!({"perspective": "defense"})),
        )
        .await
        .unwrap();
    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);
    assert_eq!(h.inference.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_inference_still_charges_the_estimate() {
    let h = HarnessBuilder::new()
        .inference(ScriptedInference::new(|_| {
            Err(InferenceError::request_failed("connection reset"))
        }))
        .build();
    let text = "a".repeat(400);
    let document = extracted_document(&h, &text).await;
    let job = h.enqueue(JobType::Analyze, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Retrying);

    let snapshot = h.limiter.snapshot(MODEL);
    assert_eq!(snapshot.available_requests, 9);
    assert!(snapshot.available_units <= 1_000_000 - 100);

    let job = h.job(&job).await;
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Request failed: connection reset")
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_timeout_is_retried_as_quota_exceeded() {
    let h = HarnessBuilder::new().limit(ResourceLimit::new(10, 50)).build();
    let document = extracted_document(&h, &"word ".repeat(200)).await;
    let job = h.enqueue(JobType::Analyze, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Retrying);
    assert_eq!(h.inference.calls(), 0);

    let job = h.job(&job).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("Quota exceeded")));
}

#[tokio::test]
async fn test_analyze_without_text_is_retried() {
    let h = HarnessBuilder::new().build();
    let document = h.upload("memo.txt", "text/plain", b"hello").await;
    let job = h.enqueue(JobType::Analyze, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Retrying);
    assert_eq!(h.job(&job).await.attempts, 1);
}

#[tokio::test]
async fn test_oversized_media_fails_permanently() {
    let h = HarnessBuilder::new()
        .config(|c| c.media.max_input_bytes = 4)
        .build();
    let document = h.upload("call.mp3", "audio/mpeg", &[0u8; 10]).await;
    let job = h.enqueue(JobType::Transcribe, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Failed);

    let job = h.job(&job).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.error_message.as_deref(),
        Some("Media exceeds maximum size of 4 bytes")
    );
    assert_eq!(h.document(&document).await.status, DocumentStatus::Failed);
    assert_eq!(h.inference.calls(), 0);
}

#[tokio::test]
async fn test_transcribe_passes_audio_through_without_transcoder() {
    let h = HarnessBuilder::new()
        .inference(ScriptedInference::new(|request| {
            if request.schema.is_some() {
                let analysis = json!({"summary": "shipping call"});
                return Ok(InferenceResponse {
                    text: analysis.to_string(),
                    json: Some(analysis),
                    usage: Some(10),
                });
            }
            Ok(InferenceResponse {
                text: "  Speaker 1: We shipped on Friday.\n".to_string(),
                json: None,
                usage: Some(64),
            })
        }))
        .build();
    let audio = vec![7u8; 32];
    let document = h.upload("call.mp3", "audio/mpeg", &audio).await;
    h.enqueue(JobType::Transcribe, &document).await;

    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);

    {
        let requests = h.inference.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].content,
            InferenceContent::Audio {
                data: audio.clone(),
                mime_type: "audio/mpeg".to_string(),
            }
        );
    }

    let stored = h.document(&document).await;
    assert_eq!(
        stored.transcript.as_deref(),
        Some("Speaker 1: We shipped on Friday.")
    );
    assert_eq!(stored.content_hash, Some(content_hash(&audio)));
    assert_eq!(stored.status, DocumentStatus::Complete);
    assert_eq!(stored.analyzable_text(), Some("Speaker 1: We shipped on Friday."));

    // The queued analysis runs over the transcript.
    assert!(h
        .jobs
        .all()
        .iter()
        .any(|j| j.job_type == JobType::Analyze && j.status == JobStatus::Pending));

    // Re-transcribing identical bytes is a cache hit.
    h.enqueue(JobType::Transcribe, &document).await;
    // The analysis queued first runs first.
    assert_eq!(h.claim_and_process().await, JobOutcome::Completed);
    assert_eq!(h.inference.calls(), 2);

    let job = h.worker.acquire_job().await.unwrap().unwrap();
    assert_eq!(job.job_type, JobType::Transcribe);
    assert_eq!(h.worker.process_job(&job).await.unwrap(), JobOutcome::Completed);
    assert_eq!(h.inference.calls(), 2);
}

#[tokio::test]
async fn test_expired_lease_goes_through_failure_path() {
    let h = HarnessBuilder::new().build();
    let document = h.upload("memo.txt", "text/plain", b"hello").await;
    let job = h.enqueue(JobType::Extract, &document).await;

    // Claimed an hour ago by a worker that never came back.
    let claimed_at = Utc::now() - chrono::Duration::hours(1);
    assert!(h
        .jobs
        .try_claim(&job.id, &LeaseId::new(), claimed_at)
        .await
        .unwrap());

    assert_eq!(h.worker.reap_expired_leases().await.unwrap(), 1);

    let job = h.job(&job).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error_message.as_deref(), Some(LEASE_EXPIRED_MESSAGE));

    // A fresh claim is not reaped.
    let claimed = h.worker.acquire_job().await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(h.worker.reap_expired_leases().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_has_one_winner() {
    let h = HarnessBuilder::new().build();
    let document = h.upload("memo.txt", "text/plain", b"hello").await;
    h.enqueue(JobType::Extract, &document).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let worker = h.worker.clone();
        handles.push(tokio::spawn(async move { worker.acquire_job().await.unwrap() }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    let processing = h
        .jobs
        .all()
        .into_iter()
        .filter(|j| j.status == JobStatus::Processing)
        .count();
    assert_eq!(processing, 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_loop_processes_jobs_and_stops() {
    let h = HarnessBuilder::new()
        .config(|c| c.auto_analyze_after_extract = false)
        .build();

    assert!(h.worker.start());
    assert!(!h.worker.start());
    assert!(h.worker.is_running());

    let document = h.upload("memo.txt", "text/plain", b"hello").await;
    let job = h.enqueue(JobType::Extract, &document).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.job(&job).await.status != JobStatus::Complete {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job completes");

    h.worker.stop_gracefully().await;
    assert!(!h.worker.is_running());

    // No polling after stop.
    let second = h.upload("other.txt", "text/plain", b"later").await;
    let pending = h.enqueue(JobType::Extract, &second).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.job(&pending).await.status, JobStatus::Pending);

    // Restart picks it up.
    assert!(h.worker.start());
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.job(&pending).await.status != JobStatus::Complete {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job completes after restart");
    h.worker.stop_gracefully().await;
}

#[tokio::test]
async fn test_reaped_worker_cannot_resolve_the_new_claim() {
    let h = HarnessBuilder::new()
        .config(|c| c.auto_analyze_after_extract = false)
        .build();
    let document = h.upload("memo.txt", "text/plain", b"hello").await;
    let job = h.enqueue(JobType::Extract, &document).await;

    let stalled = h.worker.acquire_job().await.unwrap().unwrap();

    // Another worker decides the lease is stale and takes the job over.
    let peer = h.peer(|c| c.lease_timeout = Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(peer.reap_expired_leases().await.unwrap(), 1);
    let current = peer.acquire_job().await.unwrap().unwrap();
    assert_eq!(current.id, job.id);
    assert_ne!(current.lease_id, stalled.lease_id);

    // The stalled worker wakes up: its result is discarded.
    assert_eq!(
        h.worker.process_job(&stalled).await.unwrap(),
        JobOutcome::Abandoned
    );
    let row = h.job(&job).await;
    assert_eq!(row.status, JobStatus::Processing);
    assert_eq!(row.lease_id, current.lease_id);
    assert_eq!(row.attempts, 1);

    assert_eq!(
        peer.process_job(&current).await.unwrap(),
        JobOutcome::Completed
    );
    let row = h.job(&job).await;
    assert_eq!(row.status, JobStatus::Complete);
    assert_eq!(row.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_waits_for_running_job() {
    let analysis = json!({"summary": "late answer"});
    let h = HarnessBuilder::new()
        .inference(
            ScriptedInference::json(analysis.clone(), 10).with_delay(Duration::from_millis(500)),
        )
        .build();
    let document = extracted_document(&h, "Deposition transcript, page one.").await;
    let job = h.enqueue(JobType::Analyze, &document).await;

    assert!(h.worker.start());
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.inference.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("inference call starts");
    assert_eq!(h.job(&job).await.status, JobStatus::Processing);

    h.worker.stop_gracefully().await;

    assert!(!h.worker.is_running());
    assert_eq!(h.job(&job).await.status, JobStatus::Complete);
    assert_eq!(h.document(&document).await.analysis, Some(analysis));
}

#[tokio::test]
async fn test_panicked_job_is_released_for_reaping() {
    let h = HarnessBuilder::new()
        .extractor(Arc::new(PanickingExtractor))
        .config(|c| c.lease_timeout = Duration::ZERO)
        .build();
    let document = h.upload("memo.txt", "text/plain", b"hello").await;
    let job = h.enqueue(JobType::Extract, &document).await;

    assert_eq!(h.worker.poll_once().await.unwrap(), 1);
    h.worker.wait_idle().await;
    assert_eq!(h.job(&job).await.status, JobStatus::Processing);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.worker.reap_expired_leases().await.unwrap(), 1);

    let row = h.job(&job).await;
    assert_eq!(row.status, JobStatus::Pending);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.error_message.as_deref(), Some(LEASE_EXPIRED_MESSAGE));
}
