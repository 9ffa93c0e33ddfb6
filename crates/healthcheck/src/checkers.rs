//! Health check implementations.

use crate::types::HealthCheckResult;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Health checker trait
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Perform a health check against `url`, giving up after `timeout_duration`
    async fn check(&self, url: &str, timeout_duration: Duration) -> HealthCheckResult;

    /// Get the name of this checker
    fn name(&self) -> &str;
}

/// HTTP health checker
///
/// Shares one connection pool across every monitored URL; the timeout is
/// applied per call.
#[derive(Clone)]
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    /// Create a new HTTP health checker
    pub fn new() -> common::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(common::Error::healthcheck)?;

        Ok(Self { client })
    }

    /// Create a checker on top of an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self, url: &str, timeout_duration: Duration) -> HealthCheckResult {
        let start = Instant::now();

        let request = self.client.get(url).timeout(timeout_duration);

        match timeout(timeout_duration, request.send()).await {
            Ok(Ok(response)) => {
                let duration = start.elapsed();
                let status_code = response.status().as_u16();
                let result = HealthCheckResult::from_status(duration, status_code);

                if result.is_healthy() {
                    debug!(url = %url, status = status_code, duration_ms = duration.as_millis(),
                           "HTTP check successful");
                } else {
                    warn!(url = %url, status = status_code, health = %result.health,
                          "HTTP check returned error status");
                }
                result
            }
            Ok(Err(e)) if e.is_timeout() => {
                let duration = start.elapsed();
                warn!(url = %url, "HTTP check timed out");
                HealthCheckResult::timeout(duration)
            }
            Ok(Err(e)) => {
                let duration = start.elapsed();
                warn!(url = %url, error = %e, "HTTP check failed");
                HealthCheckResult::error(duration, format!("HTTP request failed: {}", e))
            }
            Err(_) => {
                let duration = start.elapsed();
                warn!(url = %url, "HTTP check timed out");
                HealthCheckResult::timeout(duration)
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
