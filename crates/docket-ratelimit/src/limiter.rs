//! Per-resource rate limiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bucket::{BucketSnapshot, RateBucket};
use crate::config::RateLimitConfig;
use crate::metrics;

/// Shortest sleep between re-checks, so float rounding cannot spin.
const MIN_STEP: Duration = Duration::from_millis(1);

/// Token bucket rate limiter keyed by resource (e.g. model name).
///
/// Each key owns an independent bucket behind its own mutex; the key map
/// is only locked to look buckets up or create them. No fairness or
/// ordering is guaranteed among concurrent waiters.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<RateBucket>>>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get or lazily create the bucket for a key.
    fn bucket(&self, key: &str) -> Arc<Mutex<RateBucket>> {
        {
            let buckets = self.buckets.read();
            if let Some(bucket) = buckets.get(key) {
                return Arc::clone(bucket);
            }
        }

        let mut buckets = self.buckets.write();
        // Double-check after acquiring write lock
        if let Some(bucket) = buckets.get(key) {
            return Arc::clone(bucket);
        }

        let limit = self.config.limit_for(key);
        debug!(
            key = %key,
            requests_per_minute = limit.requests_per_minute,
            units_per_minute = limit.units_per_minute,
            "Creating rate bucket"
        );
        let bucket = Arc::new(Mutex::new(RateBucket::new(limit, Instant::now())));
        buckets.insert(key.to_string(), Arc::clone(&bucket));
        bucket
    }

    /// Non-blocking check: refill, then test both budgets.
    pub fn can_proceed(&self, key: &str, est_units: u64) -> bool {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock();
        bucket.refill(Instant::now());
        bucket.has_capacity(est_units)
    }

    /// Suspend the caller until both budgets cover `est_units`.
    ///
    /// Returns `false` once `max_wait` has elapsed, or immediately when the
    /// estimate exceeds the bucket's per-minute capacity. Callers treat
    /// `false` as a hard rate-limit failure.
    pub async fn wait_for_tokens(&self, key: &str, est_units: u64, max_wait: Duration) -> bool {
        let bucket = self.bucket(key);
        let started = Instant::now();
        let deadline = started + max_wait;
        let mut waited = false;

        loop {
            let now = Instant::now();
            let wait = {
                let mut bucket = bucket.lock();
                bucket.refill(now);
                if bucket.has_capacity(est_units) {
                    if waited {
                        metrics::record_wait(key, now.duration_since(started));
                    }
                    return true;
                }
                if !bucket.can_ever_admit(est_units) {
                    let limit = bucket.limit();
                    warn!(
                        key = %key,
                        est_units,
                        units_per_minute = limit.units_per_minute,
                        "Estimated cost exceeds per-minute capacity"
                    );
                    metrics::record_timeout(key);
                    return false;
                }
                bucket.time_until_capacity(est_units)
            };

            if now >= deadline {
                warn!(
                    key = %key,
                    est_units,
                    waited_ms = now.duration_since(started).as_millis() as u64,
                    "Rate limit wait timed out"
                );
                metrics::record_timeout(key);
                return false;
            }

            let step = wait
                .min(self.config.max_step)
                .min(deadline - now)
                .max(MIN_STEP);
            debug!(key = %key, est_units, step_ms = step.as_millis() as u64, "Waiting for rate limit tokens");
            waited = true;
            tokio::time::sleep(step).await;
        }
    }

    /// Charge one request and `units_used` against the key's budgets.
    ///
    /// Charged whether or not the downstream call succeeded, since the
    /// metered attempt was made either way.
    pub fn consume(&self, key: &str, units_used: u64) {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock();
        bucket.refill(Instant::now());
        bucket.consume(units_used);
    }

    /// Current budgets for a key after refilling.
    pub fn snapshot(&self, key: &str) -> BucketSnapshot {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock();
        bucket.refill(Instant::now());
        bucket.snapshot()
    }
}

/// Heuristic unit cost of a text payload: one unit per four characters.
pub fn estimate_unit_cost(content: &str) -> u64 {
    let chars = content.chars().count() as u64;
    chars.div_ceil(4)
}

/// 16 kHz mono signed 16-bit PCM.
const WAV_BYTES_PER_SECOND: u64 = 32_000;
/// Units billed per second of audio.
const AUDIO_UNITS_PER_SECOND: u64 = 32;

/// Heuristic unit cost of a normalized mono 16 kHz WAV payload.
pub fn estimate_audio_unit_cost(wav_bytes: usize) -> u64 {
    let seconds = (wav_bytes as u64).div_ceil(WAV_BYTES_PER_SECOND).max(1);
    seconds * AUDIO_UNITS_PER_SECOND
}
