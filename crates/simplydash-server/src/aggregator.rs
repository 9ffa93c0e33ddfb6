//! Merges provider app lists into health-annotated groups.

use crate::metrics::MetricsRegistry;
use crate::provider::Provider;
use crate::types::{App, AppGroup};
use common::{Signal, SignalReceiver};
use healthcheck::HealthcheckRegistry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Merges the app lists of every provider and tracks their health.
///
/// Provider notifications and health transitions are processed by a single
/// listener task; `get_apps` may be called concurrently from anywhere.
pub struct AppAggregator {
    /// Configured group names, in display order
    groups: Vec<String>,

    /// Providers in merge order
    providers: Vec<Arc<dyn Provider>>,

    /// Last fetched list per provider id
    apps_by_provider: RwLock<HashMap<String, Arc<Vec<App>>>>,

    registry: Arc<HealthcheckRegistry>,

    /// Taken by the listener task
    provider_rx: Mutex<Option<mpsc::Receiver<String>>>,
    health_updates: Mutex<Option<SignalReceiver>>,

    /// Fired whenever the aggregated view changes
    changed: Signal,

    metrics: Option<Arc<MetricsRegistry>>,
}

impl AppAggregator {
    pub fn new(
        groups: Vec<String>,
        providers: Vec<Arc<dyn Provider>>,
        registry: Arc<HealthcheckRegistry>,
        provider_rx: mpsc::Receiver<String>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        let health_updates = registry.updates();
        Self {
            groups,
            providers,
            apps_by_provider: RwLock::new(HashMap::new()),
            registry,
            provider_rx: Mutex::new(Some(provider_rx)),
            health_updates: Mutex::new(Some(health_updates)),
            changed: Signal::new(),
            metrics,
        }
    }

    /// Start every provider and spawn the listener.
    ///
    /// A provider that fails to start is logged and left out of the refresh
    /// cycle; its slot stays empty.
    pub fn init(self: &Arc<Self>) -> common::Result<JoinHandle<()>> {
        let provider_rx = self
            .provider_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let health_updates = self
            .health_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let (Some(provider_rx), Some(health_updates)) = (provider_rx, health_updates) else {
            return Err(common::Error::other("app aggregator already initialized"));
        };

        for provider in &self.providers {
            match provider.init() {
                Ok(()) => info!(provider = %provider.id(), "Provider started"),
                Err(e) => error!(provider = %provider.id(), error = %e, "Failed to start provider"),
            }
            self.update_apps(provider.id());
        }

        let aggregator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            aggregator.listen(provider_rx, health_updates).await;
        }))
    }

    async fn listen(
        &self,
        mut provider_rx: mpsc::Receiver<String>,
        mut health_updates: SignalReceiver,
    ) {
        let mut providers_open = true;
        let mut health_open = true;

        while providers_open || health_open {
            tokio::select! {
                id = provider_rx.recv(), if providers_open => match id {
                    Some(id) => self.update_apps(&id),
                    None => {
                        debug!("Provider channel closed");
                        providers_open = false;
                    }
                },
                open = health_updates.changed(), if health_open => {
                    if open {
                        debug!("Health changed");
                        self.changed.notify();
                    } else {
                        health_open = false;
                    }
                }
            }
        }

        debug!("App aggregator listener stopped");
    }

    /// Re-read the apps of provider `id` and reconcile the health checkers
    pub(crate) fn update_apps(&self, id: &str) {
        let Some(provider) = self.providers.iter().find(|p| p.id() == id) else {
            warn!(provider = %id, "Update from unknown provider");
            return;
        };

        let apps = provider.apps();
        debug!(provider = %id, apps = apps.len(), "Updating apps");
        if let Some(ref m) = self.metrics {
            m.record_provider_update(id, apps.len());
        }

        // Readers see the new list only together with its checkers
        let mut apps_by_provider = self
            .apps_by_provider
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        apps_by_provider.insert(id.to_string(), apps);
        self.refresh_health_checkers(&apps_by_provider);
        drop(apps_by_provider);

        self.changed.notify();
    }

    /// Links that should be checked, with their timing. When several apps
    /// share a link the one merged last wins.
    fn desired_checks(
        &self,
        apps_by_provider: &HashMap<String, Arc<Vec<App>>>,
    ) -> BTreeMap<String, (Duration, Duration)> {
        let mut desired = BTreeMap::new();
        for provider in &self.providers {
            let Some(apps) = apps_by_provider.get(provider.id()) else {
                continue;
            };
            for app in apps.iter().filter(|app| app.healthcheck.enabled) {
                desired.insert(
                    app.link.clone(),
                    (app.healthcheck.interval, app.healthcheck.timeout),
                );
            }
        }
        desired
    }

    fn refresh_health_checkers(&self, apps_by_provider: &HashMap<String, Arc<Vec<App>>>) {
        let desired = self.desired_checks(apps_by_provider);

        for url in self.registry.urls() {
            if !desired.contains_key(&url) {
                self.registry.remove(&url);
            }
        }
        for (url, (interval, timeout)) in &desired {
            self.registry.add(url, *interval, *timeout);
        }

        if let Some(ref m) = self.metrics {
            m.update_checker_count(self.registry.len());
        }
    }

    /// Current groups with live health attached.
    ///
    /// Configured groups come first in configured order, followed by groups
    /// first seen on an app. Apps keep ascending name order.
    pub fn get_apps(&self) -> Vec<AppGroup> {
        let mut groups: Vec<AppGroup> = self.groups.iter().map(AppGroup::new).collect();

        let apps_by_provider = self
            .apps_by_provider
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        for provider in &self.providers {
            let Some(apps) = apps_by_provider.get(provider.id()) else {
                continue;
            };

            for app in apps.iter() {
                let index = match groups.iter().position(|g| g.name == app.group) {
                    Some(index) => index,
                    None => {
                        groups.push(AppGroup::new(app.group.clone()));
                        groups.len() - 1
                    }
                };

                let mut app = app.clone();
                if app.healthcheck.enabled {
                    app.healthcheck.health = self.registry.get(&app.link);
                }
                groups[index].insert(app);
            }
        }

        groups
    }

    /// Coalesced signal fired whenever `get_apps` would return something new
    pub fn updates(&self) -> SignalReceiver {
        self.changed.subscribe()
    }

    /// Health registry shared with this aggregator
    pub fn registry(&self) -> &Arc<HealthcheckRegistry> {
        &self.registry
    }
}
