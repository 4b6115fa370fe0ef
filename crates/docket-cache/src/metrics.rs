//! Cache metrics.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    pub const HITS_TOTAL: &str = "cache_hits_total";
    pub const MISSES_TOTAL: &str = "cache_misses_total";
    pub const EVICTIONS_TOTAL: &str = "cache_evictions_total";
    /// Adapter failures, by operation.
    pub const PERSISTENCE_ERRORS_TOTAL: &str = "cache_persistence_errors_total";
}

/// Where a hit was served from.
#[derive(Debug, Clone, Copy)]
pub enum HitSource {
    Memory,
    Persistence,
}

impl HitSource {
    fn as_str(&self) -> &'static str {
        match self {
            HitSource::Memory => "memory",
            HitSource::Persistence => "persistence",
        }
    }
}

pub fn record_hit(cache: &str, source: HitSource) {
    counter!(names::HITS_TOTAL, "cache" => cache.to_string(), "source" => source.as_str())
        .increment(1);
}

pub fn record_miss(cache: &str) {
    counter!(names::MISSES_TOTAL, "cache" => cache.to_string()).increment(1);
}

pub fn record_eviction(cache: &str) {
    counter!(names::EVICTIONS_TOTAL, "cache" => cache.to_string()).increment(1);
}

pub fn record_persistence_error(cache: &str, operation: &'static str) {
    counter!(
        names::PERSISTENCE_ERRORS_TOTAL,
        "cache" => cache.to_string(),
        "operation" => operation
    )
    .increment(1);
}
