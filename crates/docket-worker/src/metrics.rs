//! Prometheus metrics for the worker.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "docket_jobs_claimed_total";
    pub const CLAIM_CONFLICTS_TOTAL: &str = "docket_job_claim_conflicts_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "docket_jobs_completed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "docket_jobs_retried_total";
    pub const JOBS_FAILED_TOTAL: &str = "docket_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "docket_job_duration_seconds";
    pub const JOBS_IN_FLIGHT: &str = "docket_jobs_in_flight";
    pub const LEASES_EXPIRED_TOTAL: &str = "docket_job_leases_expired_total";
    pub const LEASES_LOST_TOTAL: &str = "docket_job_leases_lost_total";
}

pub fn record_claim(job_type: &'static str) {
    counter!(names::JOBS_CLAIMED_TOTAL, "job_type" => job_type).increment(1);
}

pub fn record_claim_conflict() {
    counter!(names::CLAIM_CONFLICTS_TOTAL).increment(1);
}

pub fn record_completed(job_type: &'static str, elapsed: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL, "job_type" => job_type).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "job_type" => job_type)
        .record(elapsed.as_secs_f64());
}

pub fn record_retried(job_type: &'static str) {
    counter!(names::JOBS_RETRIED_TOTAL, "job_type" => job_type).increment(1);
}

pub fn record_failed(job_type: &'static str, permanent: bool) {
    let kind = if permanent { "permanent" } else { "exhausted" };
    counter!(names::JOBS_FAILED_TOTAL, "job_type" => job_type, "kind" => kind).increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_lease_expired() {
    counter!(names::LEASES_EXPIRED_TOTAL).increment(1);
}

pub fn record_lease_lost() {
    counter!(names::LEASES_LOST_TOTAL).increment(1);
}
