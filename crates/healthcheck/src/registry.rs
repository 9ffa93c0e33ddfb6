//! Registry of active health check monitors, keyed by URL.

use crate::checkers::HealthChecker;
use crate::monitor::{HealthCheckMonitor, HealthObserver};
use crate::types::{AppHealth, CheckSettings};
use common::{Signal, SignalReceiver};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owns the lifecycle of every [`HealthCheckMonitor`].
///
/// Callers only declare which URLs should be checked (`add`/`remove`); the
/// registry starts and stops the background tasks. Any health transition of
/// any monitor fires the coalesced [`HealthcheckRegistry::updates`] signal.
pub struct HealthcheckRegistry {
    /// Active monitors mapped by URL
    monitors: DashMap<String, HealthCheckMonitor>,

    /// Checker shared by all monitors
    checker: Arc<dyn HealthChecker>,

    /// Fired on every health transition
    changed: Signal,

    /// Instrumentation hooks (optional)
    observer: Option<Arc<dyn HealthObserver>>,
}

impl HealthcheckRegistry {
    /// Create an empty registry
    pub fn new(checker: Arc<dyn HealthChecker>) -> Self {
        Self {
            monitors: DashMap::new(),
            checker,
            changed: Signal::new(),
            observer: None,
        }
    }

    /// Attach instrumentation hooks to monitors started from now on
    pub fn with_observer(mut self, observer: Arc<dyn HealthObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Current health of `url`, or [`AppHealth::Error`] when it is not tracked.
    pub fn get(&self, url: &str) -> AppHealth {
        self.monitors
            .get(url)
            .map(|monitor| monitor.health())
            .unwrap_or(AppHealth::Error)
    }

    /// Snapshot of the tracked URLs
    pub fn urls(&self) -> BTreeSet<String> {
        self.monitors.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Settings of a tracked URL
    pub fn settings(&self, url: &str) -> Option<CheckSettings> {
        self.monitors.get(url).map(|monitor| monitor.settings())
    }

    /// Start checking `url`, or update the timing of an existing monitor.
    ///
    /// Zero durations fall back to the defaults.
    pub fn add(&self, url: &str, interval: Duration, timeout: Duration) {
        let settings = CheckSettings::new(interval, timeout);

        match self.monitors.entry(url.to_string()) {
            Entry::Occupied(entry) => {
                if entry.get().update(settings) {
                    info!(url = %url, interval = ?settings.interval, timeout = ?settings.timeout, "Updating healthcheck");
                }
            }
            Entry::Vacant(entry) => {
                info!(url = %url, interval = ?settings.interval, timeout = ?settings.timeout, "Adding healthcheck");
                entry.insert(HealthCheckMonitor::start(
                    url,
                    settings,
                    self.checker.clone(),
                    self.changed.clone(),
                    self.observer.clone(),
                ));
            }
        }
    }

    /// Stop checking `url`. No-op when it is not tracked.
    pub fn remove(&self, url: &str) {
        if let Some((_, monitor)) = self.monitors.remove(url) {
            info!(url = %url, "Removing healthcheck");
            monitor.stop();
        }
    }

    /// Coalesced signal fired whenever a monitored health value changes
    pub fn updates(&self) -> SignalReceiver {
        self.changed.subscribe()
    }

    /// Number of active monitors
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Whether no URL is tracked
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}
