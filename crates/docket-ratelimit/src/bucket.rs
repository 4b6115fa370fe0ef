//! Dual token bucket for a single resource.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ResourceLimit;

const MINUTE_MS: f64 = 60_000.0;

/// Available budget at a point in time, rounded down to whole tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub available_requests: u32,
    pub available_units: u64,
}

/// Request-count and unit budgets that refill continuously.
///
/// Both budgets are bounded by their per-minute capacity and never go
/// negative.
#[derive(Debug)]
pub(crate) struct RateBucket {
    limit: ResourceLimit,
    request_tokens: f64,
    unit_tokens: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// A full bucket.
    pub(crate) fn new(limit: ResourceLimit, now: Instant) -> Self {
        Self {
            limit,
            request_tokens: limit.requests_per_minute as f64,
            unit_tokens: limit.units_per_minute as f64,
            last_refill: now,
        }
    }

    pub(crate) fn limit(&self) -> ResourceLimit {
        self.limit
    }

    /// Add `capacity * elapsed / 1 minute` to each budget, capped at capacity.
    pub(crate) fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1000.0;
        if elapsed_ms <= 0.0 {
            return;
        }

        let request_cap = self.limit.requests_per_minute as f64;
        let unit_cap = self.limit.units_per_minute as f64;

        self.request_tokens =
            (self.request_tokens + request_cap * elapsed_ms / MINUTE_MS).min(request_cap);
        self.unit_tokens = (self.unit_tokens + unit_cap * elapsed_ms / MINUTE_MS).min(unit_cap);
        self.last_refill = now;
    }

    /// Whether one request of `est_units` fits in both budgets.
    pub(crate) fn has_capacity(&self, est_units: u64) -> bool {
        self.request_tokens >= 1.0 && self.unit_tokens >= est_units as f64
    }

    /// Whether `est_units` can ever fit, even in a full bucket.
    pub(crate) fn can_ever_admit(&self, est_units: u64) -> bool {
        self.limit.requests_per_minute >= 1 && est_units <= self.limit.units_per_minute
    }

    /// Time until both budgets are sufficient, assuming no other consumers.
    pub(crate) fn time_until_capacity(&self, est_units: u64) -> Duration {
        let request_wait = deficit_ms(
            1.0 - self.request_tokens,
            self.limit.requests_per_minute as f64,
        );
        let unit_wait = deficit_ms(
            est_units as f64 - self.unit_tokens,
            self.limit.units_per_minute as f64,
        );

        Duration::from_secs_f64(request_wait.max(unit_wait) / 1000.0)
    }

    /// Deduct one request slot and `units_used`, clamped at zero.
    pub(crate) fn consume(&mut self, units_used: u64) {
        self.request_tokens = (self.request_tokens - 1.0).max(0.0);
        self.unit_tokens = (self.unit_tokens - units_used as f64).max(0.0);
    }

    pub(crate) fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            available_requests: self.request_tokens.floor() as u32,
            available_units: self.unit_tokens.floor() as u64,
        }
    }
}

fn deficit_ms(deficit: f64, capacity_per_minute: f64) -> f64 {
    if deficit <= 0.0 {
        return 0.0;
    }
    if capacity_per_minute <= 0.0 {
        return f64::INFINITY;
    }
    deficit * MINUTE_MS / capacity_per_minute
}
