//! Inference metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "inference_requests_total";
    pub const REQUEST_SECONDS: &str = "inference_request_seconds";
    pub const UNITS_TOTAL: &str = "inference_units_total";
}

pub fn record_request(model: &str, outcome: &'static str, elapsed: Duration) {
    counter!(names::REQUESTS_TOTAL, "model" => model.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!(names::REQUEST_SECONDS, "model" => model.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_units(model: &str, units: u64) {
    counter!(names::UNITS_TOTAL, "model" => model.to_string()).increment(units);
}
