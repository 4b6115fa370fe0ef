//! Token bucket admission control for metered AI quotas.
//!
//! This crate provides:
//! - Independent request and unit budgets per resource key (e.g. per model)
//! - Non-blocking admission checks and bounded async waits
//! - Heuristic unit estimates for calls whose cost is unknown up front

pub mod bucket;
pub mod config;
pub mod limiter;
pub mod metrics;

pub use bucket::BucketSnapshot;
pub use config::{RateLimitConfig, ResourceLimit};
pub use limiter::{estimate_audio_unit_cost, estimate_unit_cost, RateLimiter};
