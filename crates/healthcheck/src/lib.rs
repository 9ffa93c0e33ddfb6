//! Liveness monitoring of application URLs.
//!
//! Every monitored URL gets its own background task that issues an HTTP GET
//! on a timer and classifies the outcome into one of five states:
//!
//! | outcome                         | health    |
//! |---------------------------------|-----------|
//! | request timed out               | `timeout` |
//! | any other transport error       | `error`   |
//! | status 404 or >= 500            | `error`   |
//! | other 4xx status                | `warning` |
//! | anything else                   | `healthy` |
//!
//! Before the first check completes a URL is `unknown`.
//!
//! # Example
//!
//! ```no_run
//! use healthcheck::{HealthcheckRegistry, HttpChecker};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HealthcheckRegistry::new(Arc::new(HttpChecker::new()?));
//! let mut updates = registry.updates();
//!
//! registry.add("http://grafana.local", Duration::from_secs(5), Duration::from_secs(2));
//!
//! updates.changed().await;
//! println!("grafana is {}", registry.get("http://grafana.local"));
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod monitor;
pub mod registry;
pub mod types;

pub use checkers::{HealthChecker, HttpChecker};
pub use monitor::{HealthCheckMonitor, HealthObserver};
pub use registry::HealthcheckRegistry;
pub use types::{AppHealth, CheckSettings, HealthCheckResult, classify_status};
