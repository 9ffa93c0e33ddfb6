//! Health check types and structures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default interval between two checks of the same URL.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default per-request timeout of a check.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness of a monitored URL.
///
/// Serialized as one of the lowercase tokens `healthy`, `timeout`,
/// `warning`, `error`, `unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppHealth {
    /// Target answered with a non-error status
    Healthy,
    /// Request did not complete within the timeout
    Timeout,
    /// Target answered with a 4xx status other than 404
    Warning,
    /// Transport failure, 404 or 5xx, or no checker registered
    Error,
    /// No check has completed yet
    #[default]
    Unknown,
}

impl AppHealth {
    /// Lowercase token used on the wire and in metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppHealth::Healthy => "healthy",
            AppHealth::Timeout => "timeout",
            AppHealth::Warning => "warning",
            AppHealth::Error => "error",
            AppHealth::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AppHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single check
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Classified health
    pub health: AppHealth,

    /// Duration of the request
    pub duration: Duration,

    /// Optional error message
    pub message: Option<String>,

    /// HTTP status code, when a response was received
    pub response_code: Option<u16>,
}

impl HealthCheckResult {
    /// Create a result for a received HTTP response
    pub fn from_status(duration: Duration, status: u16) -> Self {
        let health = classify_status(status);
        Self {
            health,
            duration,
            message: (health != AppHealth::Healthy)
                .then(|| format!("Unexpected status code: {}", status)),
            response_code: Some(status),
        }
    }

    /// Create a timeout result
    pub fn timeout(duration: Duration) -> Self {
        Self {
            health: AppHealth::Timeout,
            duration,
            message: Some("Health check timed out".to_string()),
            response_code: None,
        }
    }

    /// Create an error result
    pub fn error(duration: Duration, message: impl Into<String>) -> Self {
        Self {
            health: AppHealth::Error,
            duration,
            message: Some(message.into()),
            response_code: None,
        }
    }

    /// Check if the result is healthy
    pub fn is_healthy(&self) -> bool {
        self.health == AppHealth::Healthy
    }
}

/// Classify an HTTP status code.
///
/// 404 and everything from 500 up is an error, the rest of 4xx is a warning,
/// anything else counts as healthy.
pub fn classify_status(status: u16) -> AppHealth {
    match status {
        404 | 500.. => AppHealth::Error,
        400..=499 => AppHealth::Warning,
        _ => AppHealth::Healthy,
    }
}

/// Timing of the checks for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSettings {
    /// Interval between checks
    pub interval: Duration,

    /// Timeout of a single check
    pub timeout: Duration,
}

impl CheckSettings {
    /// Build settings, replacing zero durations with the defaults.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: if interval.is_zero() { DEFAULT_INTERVAL } else { interval },
            timeout: if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout },
        }
    }
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
