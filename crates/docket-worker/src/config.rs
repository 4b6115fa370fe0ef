//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

use docket_cache::CacheConfig;
use docket_media::TranscoderConfig;
use docket_ratelimit::RateLimitConfig;

pub const DEFAULT_ANALYSIS_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gemini-2.5-flash";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between polls of the job store
    pub poll_interval: Duration,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Jobs processing longer than this are assumed abandoned
    pub lease_timeout: Duration,
    /// How often to scan for abandoned jobs
    pub lease_check_interval: Duration,
    /// Longest wait for rate limit budget before a job attempt fails
    pub rate_limit_max_wait: Duration,
    /// Model used for analysis jobs
    pub analysis_model: String,
    /// Model used for transcription jobs
    pub transcription_model: String,
    /// Queue an analyze job once text is available
    pub auto_analyze_after_extract: bool,
    /// Prometheus listener address; `None` disables the exporter
    pub metrics_addr: Option<SocketAddr>,
    pub cache: CacheConfig,
    pub rate_limits: RateLimitConfig,
    pub media: TranscoderConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_concurrent_jobs: 1,
            lease_timeout: Duration::from_secs(15 * 60),
            lease_check_interval: Duration::from_secs(60),
            rate_limit_max_wait: Duration::from_secs(120),
            analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            auto_analyze_after_extract: true,
            metrics_addr: None,
            cache: CacheConfig::default(),
            rate_limits: RateLimitConfig::default(),
            media: TranscoderConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(
                std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            lease_timeout: Duration::from_secs(
                std::env::var("WORKER_LEASE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15 * 60),
            ),
            lease_check_interval: Duration::from_secs(
                std::env::var("WORKER_LEASE_CHECK_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            rate_limit_max_wait: Duration::from_secs(
                std::env::var("RATE_LIMIT_MAX_WAIT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            analysis_model: std::env::var("ANALYSIS_MODEL").unwrap_or(defaults.analysis_model),
            transcription_model: std::env::var("TRANSCRIPTION_MODEL")
                .unwrap_or(defaults.transcription_model),
            auto_analyze_after_extract: std::env::var("AUTO_ANALYZE_AFTER_EXTRACT")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            cache: CacheConfig::from_env(),
            rate_limits: RateLimitConfig::from_env(),
            media: TranscoderConfig::from_env(),
        }
    }
}
