//! Per-URL health check task.

use crate::checkers::HealthChecker;
use crate::types::{AppHealth, CheckSettings, HealthCheckResult};
use common::Signal;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hooks for instrumentation of check results.
pub trait HealthObserver: Send + Sync {
    /// Called after every completed check.
    fn on_check(&self, _url: &str, _result: &HealthCheckResult) {}

    /// Called when the health of a URL differs from its previous value.
    fn on_transition(&self, _url: &str, _from: AppHealth, _to: AppHealth) {}
}

/// Health check monitor for a single URL
///
/// Owns a background task that checks the URL immediately and then once
/// per interval. The task ends when the monitor is stopped or dropped.
pub struct HealthCheckMonitor {
    url: String,
    settings_tx: watch::Sender<CheckSettings>,
    health_rx: watch::Receiver<AppHealth>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthCheckMonitor {
    /// Spawn the monitor task. `changed` is notified on every health transition.
    pub fn start(
        url: impl Into<String>,
        settings: CheckSettings,
        checker: Arc<dyn HealthChecker>,
        changed: Signal,
        observer: Option<Arc<dyn HealthObserver>>,
    ) -> Self {
        let url = url.into();
        let (settings_tx, settings_rx) = watch::channel(settings);
        let (health_tx, health_rx) = watch::channel(AppHealth::Unknown);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            url.clone(),
            checker,
            settings_rx,
            health_tx,
            changed,
            observer,
            cancel.clone(),
        ));

        Self {
            url,
            settings_tx,
            health_rx,
            cancel,
            task,
        }
    }

    /// URL being monitored
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Last known health
    pub fn health(&self) -> AppHealth {
        *self.health_rx.borrow()
    }

    /// Current check settings
    pub fn settings(&self) -> CheckSettings {
        *self.settings_tx.borrow()
    }

    /// Replace the check settings.
    ///
    /// Any change restarts the ticker: the next check runs one full interval
    /// later and no extra immediate check is made. Returns whether anything
    /// changed.
    pub fn update(&self, settings: CheckSettings) -> bool {
        self.settings_tx.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        })
    }

    /// Stop monitoring. An in-flight check is abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the background task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HealthCheckMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ticker(settings: &CheckSettings, immediate: bool) -> Interval {
    let mut ticker = if immediate {
        interval(settings.interval)
    } else {
        interval_at(Instant::now() + settings.interval, settings.interval)
    };
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run(
    url: String,
    checker: Arc<dyn HealthChecker>,
    mut settings_rx: watch::Receiver<CheckSettings>,
    health_tx: watch::Sender<AppHealth>,
    changed: Signal,
    observer: Option<Arc<dyn HealthObserver>>,
    cancel: CancellationToken,
) {
    let mut settings = *settings_rx.borrow_and_update();
    let mut check_interval = ticker(&settings, true);
    let mut checked = false;

    debug!(url = %url, interval = ?settings.interval, timeout = ?settings.timeout, "Health check monitor started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            res = settings_rx.changed() => {
                if res.is_err() {
                    break;
                }
                let updated = *settings_rx.borrow_and_update();
                // The first check stays immediate even if settings arrive before it
                check_interval = ticker(&updated, !checked);
                debug!(url = %url, interval = ?updated.interval, timeout = ?updated.timeout, "Health check settings updated");
                settings = updated;
            }
            _ = check_interval.tick() => {
                let result = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = checker.check(&url, settings.timeout) => Some(result),
                };
                let Some(result) = result else {
                    break;
                };
                checked = true;

                if let Some(ref o) = observer {
                    o.on_check(&url, &result);
                }

                let previous = health_tx.send_replace(result.health);
                if previous != result.health {
                    info!(url = %url, old_health = %previous, new_health = %result.health, "Health changed");
                    if let Some(ref o) = observer {
                        o.on_transition(&url, previous, result.health);
                    }
                    changed.notify();
                }
            }
        }
    }

    debug!(url = %url, "Health check monitor stopped");
}
