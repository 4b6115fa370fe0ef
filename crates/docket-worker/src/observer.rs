//! Job lifecycle observers.

use docket_models::Job;

/// Receives job lifecycle events. Callbacks run inline on the job's task
/// and must not block.
pub trait JobObserver: Send + Sync {
    fn on_progress(&self, _job: &Job, _progress: u8) {}

    fn on_complete(&self, _job: &Job) {}

    /// `will_retry` is true when the job went back to pending.
    fn on_error(&self, _job: &Job, _error: &str, _will_retry: bool) {}
}
