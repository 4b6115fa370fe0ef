//! Polling job worker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use docket_models::{Job, JobId, JobStatus, LeaseId};
use docket_queue::QueueError;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::observer::JobObserver;
use crate::processor::{self, JobContext};
use crate::services::WorkerServices;

/// Message recorded on jobs taken back from a crashed worker.
pub const LEASE_EXPIRED_MESSAGE: &str = "lease expired";

/// Floor for loop intervals; `tokio::time::interval` rejects zero.
const MIN_TICK: Duration = Duration::from_millis(10);

/// How a processed job was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Back to pending for another attempt
    Retrying,
    Failed,
    /// The lease was reaped and the job taken over elsewhere; the result of
    /// this attempt was discarded
    Abandoned,
}

/// Drops a job from the in-flight set when its task ends, panics included.
struct InFlightGuard {
    worker: JobWorker,
    job_id: JobId,
}

impl InFlightGuard {
    fn track(worker: &JobWorker, job_id: JobId) -> Self {
        let mut in_flight = worker.inner.in_flight.lock();
        in_flight.insert(job_id.clone());
        metrics::set_in_flight(in_flight.len());
        drop(in_flight);

        Self {
            worker: worker.clone(),
            job_id,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.worker.inner.in_flight.lock();
        in_flight.remove(&self.job_id);
        metrics::set_in_flight(in_flight.len());
    }
}

/// Lease a claimed job is held under.
fn lease_of(job: &Job) -> WorkerResult<&LeaseId> {
    job.lease_id
        .as_ref()
        .ok_or_else(|| WorkerError::from(QueueError::lease_lost(job.id.as_str())))
}

/// Claims jobs from the shared store and runs them.
///
/// Cheap to clone; clones share the same loop, permits and observers.
#[derive(Clone)]
pub struct JobWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    config: WorkerConfig,
    services: WorkerServices,
    job_semaphore: Arc<Semaphore>,
    /// Present while a poll loop is running
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    running: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    observers: RwLock<Vec<Arc<dyn JobObserver>>>,
    /// Jobs this process is running, exempt from lease reaping
    in_flight: Mutex<HashSet<JobId>>,
}

impl JobWorker {
    pub fn new(config: WorkerConfig, services: WorkerServices) -> Self {
        let permits = config.max_concurrent_jobs.max(1);
        Self {
            inner: Arc::new(WorkerInner {
                config,
                services,
                job_semaphore: Arc::new(Semaphore::new(permits)),
                shutdown: Mutex::new(None),
                running: AtomicBool::new(false),
                poll_task: Mutex::new(None),
                observers: RwLock::new(Vec::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        self.inner.observers.write().push(observer);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the poll loop. Returns false if it is already running.
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.inner.shutdown.lock() = Some(shutdown_tx);

        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.run_loop(shutdown_rx).await });
        *self.inner.poll_task.lock() = Some(handle);

        info!(
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "Job worker started"
        );
        true
    }

    /// Stop polling. Jobs already running are left to finish.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            if let Some(shutdown) = self.inner.shutdown.lock().take() {
                let _ = shutdown.send(true);
            }
            info!("Job worker stopping");
        }
    }

    /// Stop polling, then wait for in-flight jobs and pending cache writes.
    pub async fn stop_gracefully(&self) {
        self.stop();

        let handle = self.inner.poll_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Poll loop panicked: {}", e);
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        self.wait_idle().await;
        self.inner.services.cache.flush().await;
        info!("Job worker stopped");
    }

    /// Wait until no job is running.
    pub async fn wait_idle(&self) {
        let permits = self.inner.config.max_concurrent_jobs.max(1) as u32;
        // The semaphore is never closed.
        if let Ok(all) = self.inner.job_semaphore.acquire_many(permits).await {
            drop(all);
        }
    }

    async fn run_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let config = &self.inner.config;
        let mut poll = tokio::time::interval(config.poll_interval.max(MIN_TICK));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lease_check = tokio::time::interval(config.lease_check_interval.max(MIN_TICK));
        lease_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = lease_check.tick() => {
                    if let Err(e) = self.reap_expired_leases().await {
                        warn!("Failed to reap expired leases: {}", e);
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Failed to poll for jobs: {}", e);
                    }
                }
            }
        }

        debug!("Poll loop exited");
    }

    /// Claim jobs until the concurrency slots are full or none are pending,
    /// spawning each claimed job. Returns how many were claimed.
    pub async fn poll_once(&self) -> WorkerResult<usize> {
        let mut claimed = 0;

        loop {
            let Ok(permit) = self.inner.job_semaphore.clone().try_acquire_owned() else {
                break;
            };
            let Some(job) = self.acquire_job().await? else {
                break;
            };

            claimed += 1;
            let guard = InFlightGuard::track(self, job.id.clone());

            let worker = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                if let Err(e) = worker.process_job(&job).await {
                    error!(job_id = %job.id, "Failed to resolve job: {}", e);
                }
            });
        }

        Ok(claimed)
    }

    /// Pick the next pending job and try to claim it under a fresh lease.
    ///
    /// Returns `None` when nothing is pending or another worker won the claim.
    pub async fn acquire_job(&self) -> WorkerResult<Option<Job>> {
        let jobs = &self.inner.services.jobs;

        let Some(mut job) = jobs.find_next_pending().await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let lease = LeaseId::new();
        if !jobs.try_claim(&job.id, &lease, now).await? {
            debug!(job_id = %job.id, "Lost claim race");
            metrics::record_claim_conflict();
            return Ok(None);
        }

        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.lease_id = Some(lease);
        metrics::record_claim(job.job_type.as_str());
        Ok(Some(job))
    }

    /// Run a claimed job and record its outcome in the store.
    pub async fn process_job(&self, job: &Job) -> WorkerResult<JobOutcome> {
        let logger = JobLogger::new(job);
        let span = logger.create_span();
        self.process_job_inner(job, &logger).instrument(span).await
    }

    async fn process_job_inner(&self, job: &Job, logger: &JobLogger) -> WorkerResult<JobOutcome> {
        let started = Instant::now();
        let observers = self.inner.observers.read().clone();

        let ctx = JobContext {
            job,
            services: &self.inner.services,
            config: &self.inner.config,
            logger,
            observers: &observers,
        };

        let resolved = match processor::run(&ctx).await {
            Ok(()) => self.resolve_success(job, logger, started, &observers).await,
            Err(e) => {
                let message = e.to_string();
                logger.log_error(&message);
                self.resolve_failure(job, &message, e.is_permanent(), &observers)
                    .await
            }
        };

        match resolved {
            Err(WorkerError::Queue(e)) if e.is_lease_lost() => {
                warn!(job_id = %job.id, "Lease lost before the job resolved: {}", e);
                metrics::record_lease_lost();
                Ok(JobOutcome::Abandoned)
            }
            other => other,
        }
    }

    async fn resolve_success(
        &self,
        job: &Job,
        logger: &JobLogger,
        started: Instant,
        observers: &[Arc<dyn JobObserver>],
    ) -> WorkerResult<JobOutcome> {
        self.inner
            .services
            .jobs
            .complete(&job.id, lease_of(job)?, Utc::now())
            .await?;
        metrics::record_completed(job.job_type.as_str(), started.elapsed());
        logger.log_completion(&format!(
            "finished in {}ms",
            started.elapsed().as_millis()
        ));
        for observer in observers {
            observer.on_complete(job);
        }
        Ok(JobOutcome::Completed)
    }

    /// Requeue or fail a job after a failed attempt.
    async fn resolve_failure(
        &self,
        job: &Job,
        message: &str,
        permanent: bool,
        observers: &[Arc<dyn JobObserver>],
    ) -> WorkerResult<JobOutcome> {
        let services = &self.inner.services;
        let lease = lease_of(job)?;
        let attempts = job.attempts + 1;
        let will_retry = !permanent && job.has_attempts_remaining();

        if will_retry {
            services
                .jobs
                .requeue(&job.id, lease, attempts, message)
                .await?;
            for observer in observers {
                observer.on_error(job, message, true);
            }
            metrics::record_retried(job.job_type.as_str());
            info!(
                job_id = %job.id,
                attempts,
                max_attempts = job.max_attempts,
                "Job requeued"
            );
            return Ok(JobOutcome::Retrying);
        }

        services
            .jobs
            .fail(&job.id, lease, attempts, message, Utc::now())
            .await?;
        for observer in observers {
            observer.on_error(job, message, false);
        }
        if let Some(document_id) = &job.document_id {
            services.documents.mark_failed(document_id, message).await?;
        }
        metrics::record_failed(job.job_type.as_str(), permanent);
        warn!(
            job_id = %job.id,
            attempts,
            permanent,
            "Job failed: {}", message
        );
        Ok(JobOutcome::Failed)
    }

    /// Return jobs abandoned in `processing` past the lease timeout to the
    /// failure path under the lease they were claimed with, so a holder
    /// that later wakes up cannot resolve them. Jobs running in this process
    /// are skipped.
    pub async fn reap_expired_leases(&self) -> WorkerResult<usize> {
        let lease = chrono::Duration::from_std(self.inner.config.lease_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - lease;

        let expired = self.inner.services.jobs.expired_leases(cutoff).await?;
        let observers = self.inner.observers.read().clone();
        let mut reaped = 0;

        for job in expired {
            if self.inner.in_flight.lock().contains(&job.id) {
                continue;
            }

            match self
                .resolve_failure(&job, LEASE_EXPIRED_MESSAGE, false, &observers)
                .await
            {
                Ok(_) => {
                    reaped += 1;
                    metrics::record_lease_expired();
                }
                // Finished or reaped elsewhere since the scan.
                Err(e) => warn!(job_id = %job.id, "Failed to reap job: {}", e),
            }
        }

        if reaped > 0 {
            info!(count = reaped, "Reaped expired job leases");
        }
        Ok(reaped)
    }
}
