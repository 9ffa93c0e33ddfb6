//! Prometheus metrics for simplydash.

use healthcheck::{AppHealth, HealthCheckResult, HealthObserver};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for per-provider metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProviderLabels {
    /// Provider ID (docker-local, file-main)
    pub provider: String,
}

/// Labels for check result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthLabels {
    /// Resulting health (healthy, timeout, warning, error)
    pub health: String,
}

/// Labels for health transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    /// From state
    pub from: String,
    /// To state
    pub to: String,
}

/// Metrics registry with all simplydash metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    /// Provider change notifications processed
    provider_updates_total: Family<ProviderLabels, Counter>,
    /// Apps currently cached per provider
    provider_apps: Family<ProviderLabels, Gauge>,

    /// Active health checkers
    healthcheckers_active: Gauge,
    /// Completed checks by result
    health_checks_total: Family<HealthLabels, Counter>,
    /// Health transitions
    health_transitions_total: Family<TransitionLabels, Counter>,
    /// Check duration
    check_duration_seconds: Histogram,

    /// Connected websocket subscribers
    websocket_connections: Gauge,
    /// Snapshots pushed to all subscribers
    websocket_broadcasts_total: Counter,
    /// Subscribers dropped after a failed write
    websocket_send_failures_total: Counter,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let provider_updates_total = Family::<ProviderLabels, Counter>::default();
        registry.register(
            "simplydash_provider_updates",
            "Total provider change notifications processed",
            provider_updates_total.clone(),
        );

        let provider_apps = Family::<ProviderLabels, Gauge>::default();
        registry.register(
            "simplydash_provider_apps",
            "Apps currently cached per provider",
            provider_apps.clone(),
        );

        let healthcheckers_active = Gauge::default();
        registry.register(
            "simplydash_healthcheckers_active",
            "Number of active health checkers",
            healthcheckers_active.clone(),
        );

        let health_checks_total = Family::<HealthLabels, Counter>::default();
        registry.register(
            "simplydash_health_checks",
            "Total health checks performed",
            health_checks_total.clone(),
        );

        let health_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "simplydash_health_transitions",
            "Total health state transitions",
            health_transitions_total.clone(),
        );

        // Exponential buckets from 1ms to ~32s
        let check_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 16));
        registry.register(
            "simplydash_check_duration_seconds",
            "Health check duration in seconds",
            check_duration_seconds.clone(),
        );

        let websocket_connections = Gauge::default();
        registry.register(
            "simplydash_websocket_connections",
            "Connected websocket subscribers",
            websocket_connections.clone(),
        );

        let websocket_broadcasts_total = Counter::default();
        registry.register(
            "simplydash_websocket_broadcasts",
            "Total snapshots broadcast to subscribers",
            websocket_broadcasts_total.clone(),
        );

        let websocket_send_failures_total = Counter::default();
        registry.register(
            "simplydash_websocket_send_failures",
            "Total subscribers dropped after a failed write",
            websocket_send_failures_total.clone(),
        );

        Self {
            registry,
            provider_updates_total,
            provider_apps,
            healthcheckers_active,
            health_checks_total,
            health_transitions_total,
            check_duration_seconds,
            websocket_connections,
            websocket_broadcasts_total,
            websocket_send_failures_total,
        }
    }

    /// Record a processed provider notification and its cache size
    pub fn record_provider_update(&self, provider: &str, apps: usize) {
        let labels = ProviderLabels {
            provider: provider.to_string(),
        };
        self.provider_updates_total.get_or_create(&labels).inc();
        self.provider_apps.get_or_create(&labels).set(apps as i64);
    }

    /// Update active checker count
    pub fn update_checker_count(&self, count: usize) {
        self.healthcheckers_active.set(count as i64);
    }

    /// Update connected subscriber count
    pub fn update_connection_count(&self, count: usize) {
        self.websocket_connections.set(count as i64);
    }

    /// Record a broadcast
    pub fn record_broadcast(&self) {
        self.websocket_broadcasts_total.inc();
    }

    /// Record a dropped subscriber
    pub fn record_send_failure(&self) {
        self.websocket_send_failures_total.inc();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthObserver for MetricsRegistry {
    fn on_check(&self, _url: &str, result: &HealthCheckResult) {
        self.health_checks_total
            .get_or_create(&HealthLabels {
                health: result.health.to_string(),
            })
            .inc();
        self.check_duration_seconds
            .observe(result.duration.as_secs_f64());
    }

    fn on_transition(&self, _url: &str, from: AppHealth, to: AppHealth) {
        self.health_transitions_total
            .get_or_create(&TransitionLabels {
                from: from.to_string(),
                to: to.to_string(),
            })
            .inc();
    }
}
