//! Media metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    pub const TRANSCODES_TOTAL: &str = "media_transcodes_total";
    pub const TRANSCODE_SECONDS: &str = "media_transcode_seconds";
    /// Children killed for exceeding the output ceiling or timing out.
    pub const TRANSCODER_KILLS_TOTAL: &str = "media_transcoder_kills_total";
    /// Audio passed through untranscoded because the transcoder is missing.
    pub const PASSTHROUGH_TOTAL: &str = "media_transcode_passthrough_total";
}

pub fn record_transcode(outcome: &'static str, elapsed: Duration) {
    counter!(names::TRANSCODES_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::TRANSCODE_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_kill(reason: &'static str) {
    counter!(names::TRANSCODER_KILLS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_passthrough() {
    counter!(names::PASSTHROUGH_TOTAL).increment(1);
}
