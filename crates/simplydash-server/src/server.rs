//! Main simplydash server implementation.

use crate::aggregator::AppAggregator;
use crate::config::Config;
use crate::http_server::{AppState, DashboardServer};
use crate::metrics::MetricsRegistry;
use crate::provider::build_providers;
use crate::websocket::WebsocketServer;
use anyhow::Context;
use healthcheck::{HealthObserver, HealthcheckRegistry, HttpChecker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Simplydash server
pub struct SimplydashServer {
    config: Config,
}

impl SimplydashServer {
    /// Create a new server
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the server until a task ends or Ctrl-C is received
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting simplydash server");

        let listen_addr = self.config.listen_addr()?;

        // Create metrics registry (optional)
        let metrics = if self.config.metrics.enabled {
            info!("Metrics enabled");
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let checker = Arc::new(HttpChecker::new().context("failed to build HTTP client")?);
        let mut registry = HealthcheckRegistry::new(checker);
        if let Some(ref m) = metrics {
            registry = registry.with_observer(m.clone() as Arc<dyn HealthObserver>);
        }
        let registry = Arc::new(registry);

        let (provider_tx, provider_rx) = mpsc::channel(self.config.channels.provider_updates);
        let providers = build_providers(&self.config.providers, provider_tx);
        if providers.is_empty() {
            warn!("No providers configured");
        }

        let aggregator = Arc::new(AppAggregator::new(
            self.config.app.groups.clone(),
            providers,
            registry,
            provider_rx,
            metrics.clone(),
        ));
        let websocket = Arc::new(WebsocketServer::new(aggregator.clone(), metrics.clone()));

        // Subscribe before providers start so the first lists are broadcast
        let broadcaster_handle = websocket.init();
        let aggregator_handle = aggregator.init()?;

        let http = DashboardServer::new(
            AppState::new(aggregator, websocket, metrics),
            listen_addr,
            self.config.server.access_logs,
        );
        let http_handle = tokio::spawn(http.run());

        info!("All tasks spawned, server running");

        tokio::select! {
            res = http_handle => {
                res.context("HTTP server task panicked")?
                    .with_context(|| format!("HTTP server on {} failed", listen_addr))?;
                info!("HTTP server completed");
            }
            _ = aggregator_handle => {
                info!("Aggregator task completed");
            }
            _ = broadcaster_handle => {
                info!("Websocket broadcaster completed");
            }
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
            }
        }

        info!("Simplydash server stopped");
        Ok(())
    }
}
