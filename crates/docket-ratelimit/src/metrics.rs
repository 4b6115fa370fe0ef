//! Rate limiter metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Waits that ended in admission, by resource.
    pub const WAITS_TOTAL: &str = "rate_limit_waits_total";

    /// Waits that gave up, by resource.
    pub const TIMEOUTS_TOTAL: &str = "rate_limit_timeouts_total";

    /// Time spent waiting before admission, in seconds.
    pub const WAIT_SECONDS: &str = "rate_limit_wait_seconds";
}

/// Record a wait that ended in admission.
pub fn record_wait(resource: &str, waited: Duration) {
    counter!(names::WAITS_TOTAL, "resource" => resource.to_string()).increment(1);
    histogram!(names::WAIT_SECONDS, "resource" => resource.to_string())
        .record(waited.as_secs_f64());
}

/// Record a wait that gave up.
pub fn record_timeout(resource: &str) {
    counter!(names::TIMEOUTS_TOTAL, "resource" => resource.to_string()).increment(1);
}
