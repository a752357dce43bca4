use std::time::Duration;
use thiserror::Error;

/// Rejected [RateLimitConfig] values.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Rate limit must allow at least one request per window")]
    ZeroLimit,
    #[error("Refresh interval must be non-zero")]
    ZeroRefreshInterval,
}

/// Convenience window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Second,
    Minute,
    Hour,
    Day,
}

impl Interval {
    pub fn duration(self) -> Duration {
        let secs = match self {
            Interval::Second => 1,
            Interval::Minute => 60,
            Interval::Hour => 60 * 60,
            Interval::Day => 60 * 60 * 24,
        };
        Duration::from_secs(secs)
    }
}

/// A fixed window rate limit policy.
///
/// The values are validated once at construction, so a config that exists is always usable on
/// the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawConfig"))]
pub struct RateLimitConfig {
    limit: u64,
    refresh_interval: Duration,
}

impl RateLimitConfig {
    /// # Arguments
    ///
    /// * `limit`: The total requests to be allowed within the interval.
    /// * `refresh_interval`: The length of each window.
    pub fn new(limit: u64, refresh_interval: Duration) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::ZeroLimit);
        }
        if refresh_interval.is_zero() {
            return Err(ConfigError::ZeroRefreshInterval);
        }
        Ok(Self {
            limit,
            refresh_interval,
        })
    }

    /// Allow `limit` requests per [Interval].
    pub fn per(limit: u64, interval: Interval) -> Result<Self, ConfigError> {
        Self::new(limit, interval.duration())
    }

    pub fn from_secs(limit: u64, refresh_interval_secs: u64) -> Result<Self, ConfigError> {
        Self::new(limit, Duration::from_secs(refresh_interval_secs))
    }

    /// Maximum requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of a window.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawConfig {
    limit: u64,
    #[serde(alias = "refreshInterval")]
    refresh_interval: u64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawConfig> for RateLimitConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Self::from_secs(raw.limit, raw.refresh_interval)
    }
}
