//! Simplydash - live application dashboard backend
//!
//! Discovers applications from container labels and YAML files, watches
//! their liveness over HTTP and pushes the merged, health-annotated view to
//! every connected browser.
//!
//! # Architecture
//!
//! - **Providers** keep an ordered cache of apps per source and announce
//!   changes by id on a shared channel
//! - **Aggregator** merges the caches into groups and keeps one health
//!   checker per enabled link
//! - **Websocket server** serializes the view once per change and pushes it
//!   to every subscriber, latest-wins
//!
//! Health checking itself lives in the `healthcheck` crate.

pub mod aggregator;
pub mod config;
pub mod http_server;
pub mod metrics;
pub mod provider;
pub mod server;
pub mod types;
pub mod websocket;

pub use aggregator::AppAggregator;
pub use config::{Config, ConfigError};
pub use http_server::{AppState, DashboardServer};
pub use metrics::MetricsRegistry;
pub use provider::{Provider, ProviderError};
pub use server::SimplydashServer;
pub use types::{App, AppGroup, AppHealthcheck};
pub use websocket::{SubscriberSink, WebsocketServer};
