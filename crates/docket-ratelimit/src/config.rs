//! Rate limit configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-minute budget for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimit {
    /// Requests admitted per minute
    pub requests_per_minute: u32,
    /// Consumption units (e.g. tokens) admitted per minute
    pub units_per_minute: u64,
}

impl ResourceLimit {
    pub const fn new(requests_per_minute: u32, units_per_minute: u64) -> Self {
        Self {
            requests_per_minute,
            units_per_minute,
        }
    }
}

impl Default for ResourceLimit {
    fn default() -> Self {
        Self::new(10, 250_000)
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Profile used for keys without an explicit entry
    pub default_limit: ResourceLimit,
    /// Explicit per-resource profiles
    pub per_resource: HashMap<String, ResourceLimit>,
    /// Longest single sleep inside `wait_for_tokens`
    pub max_step: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let per_resource = HashMap::from([
            ("gemini-2.5-flash".to_string(), ResourceLimit::new(10, 1_000_000)),
            ("gemini-2.5-flash-lite".to_string(), ResourceLimit::new(15, 1_000_000)),
            ("gemini-2.5-pro".to_string(), ResourceLimit::new(5, 250_000)),
        ]);

        Self {
            default_limit: ResourceLimit::default(),
            per_resource,
            max_step: Duration::from_secs(5),
        }
    }
}

impl RateLimitConfig {
    /// Create config from environment variables.
    ///
    /// `RATE_LIMITS` is a comma-separated list of `key=requests:units`
    /// entries, e.g. `gemini-2.5-flash=10:1000000,gemini-2.5-pro=5:250000`.
    /// `RATE_LIMIT_DEFAULT` uses the `requests:units` form.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("RATE_LIMIT_DEFAULT") {
            match parse_limit(&raw) {
                Some(limit) => config.default_limit = limit,
                None => warn!(value = %raw, "Ignoring malformed RATE_LIMIT_DEFAULT"),
            }
        }

        if let Ok(raw) = std::env::var("RATE_LIMITS") {
            config.per_resource.extend(parse_limits(&raw));
        }

        if let Some(secs) = std::env::var("RATE_LIMIT_MAX_STEP_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_step = Duration::from_secs(secs);
        }

        config
    }

    /// Set the profile for a resource.
    pub fn with_limit(mut self, key: impl Into<String>, limit: ResourceLimit) -> Self {
        self.per_resource.insert(key.into(), limit);
        self
    }

    /// Set the default profile.
    pub fn with_default_limit(mut self, limit: ResourceLimit) -> Self {
        self.default_limit = limit;
        self
    }

    /// Profile for a key, falling back to the default.
    pub fn limit_for(&self, key: &str) -> ResourceLimit {
        self.per_resource
            .get(key)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

fn parse_limit(raw: &str) -> Option<ResourceLimit> {
    let (requests, units) = raw.trim().split_once(':')?;
    Some(ResourceLimit::new(
        requests.trim().parse().ok()?,
        units.trim().parse().ok()?,
    ))
}

/// Parse `key=requests:units` pairs, skipping malformed entries.
pub(crate) fn parse_limits(raw: &str) -> HashMap<String, ResourceLimit> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let parsed = entry
                .split_once('=')
                .and_then(|(key, limit)| Some((key.trim().to_string(), parse_limit(limit)?)));
            if parsed.is_none() {
                warn!(entry = %entry, "Ignoring malformed rate limit entry");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limits() {
        let limits = parse_limits("gemini-2.5-flash=10:1000000, whisper = 3:500 ,broken,x=1:");
        assert_eq!(limits.len(), 2);
        assert_eq!(limits["gemini-2.5-flash"], ResourceLimit::new(10, 1_000_000));
        assert_eq!(limits["whisper"], ResourceLimit::new(3, 500));
    }

    #[test]
    fn test_unknown_key_uses_default() {
        let config = RateLimitConfig::default().with_default_limit(ResourceLimit::new(1, 2));
        assert_eq!(config.limit_for("no-such-model"), ResourceLimit::new(1, 2));
        assert_eq!(
            config.limit_for("gemini-2.5-pro"),
            ResourceLimit::new(5, 250_000)
        );
    }
}
