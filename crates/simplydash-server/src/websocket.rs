//! Fan-out of the aggregated view to live subscribers.

use crate::aggregator::AppAggregator;
use crate::metrics::MetricsRegistry;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::SinkExt;
use futures::stream::SplitSink;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound half of a subscriber connection
#[async_trait]
pub trait SubscriberSink: Send + 'static {
    async fn send_text(&mut self, payload: Arc<str>) -> common::Result<()>;

    async fn close(&mut self);
}

#[async_trait]
impl SubscriberSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, payload: Arc<str>) -> common::Result<()> {
        self.send(Message::Text(payload.to_string()))
            .await
            .map_err(common::Error::transport)
    }

    async fn close(&mut self) {
        let _ = SinkExt::close(self).await;
    }
}

struct Connection {
    /// Latest payload not yet written; a newer one overwrites it
    tx: watch::Sender<Arc<str>>,
    cancel: CancellationToken,
}

/// Pushes the serialized app groups to every connected subscriber.
pub struct WebsocketServer {
    aggregator: Arc<AppAggregator>,
    connections: DashMap<String, Connection>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl WebsocketServer {
    pub fn new(aggregator: Arc<AppAggregator>, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        Self {
            aggregator,
            connections: DashMap::new(),
            metrics,
        }
    }

    /// Spawn the broadcaster reacting to aggregator updates
    pub fn init(self: &Arc<Self>) -> JoinHandle<()> {
        let mut updates = self.aggregator.updates();
        let server = Arc::clone(self);

        tokio::spawn(async move {
            while updates.changed().await {
                server.broadcast();
            }
            debug!("Websocket broadcaster stopped");
        })
    }

    /// Serialize the current view once
    pub fn snapshot(&self) -> common::Result<Arc<str>> {
        let json = serde_json::to_string(&self.aggregator.get_apps())?;
        Ok(Arc::from(json))
    }

    fn broadcast(&self) {
        let payload = match self.snapshot() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize apps");
                return;
            }
        };

        debug!(connections = self.connections.len(), "Broadcasting apps");
        for connection in self.connections.iter() {
            connection.tx.send_replace(payload.clone());
        }
        if let Some(ref m) = self.metrics {
            m.record_broadcast();
        }
    }

    /// Register a subscriber and spawn its send loop.
    ///
    /// The current view is sent right away. The loop ends on the first
    /// failed write or on [`WebsocketServer::disconnect`], closing the sink.
    pub fn connect<S: SubscriberSink>(self: &Arc<Self>, id: impl Into<String>, sink: S) -> JoinHandle<()> {
        let id = id.into();
        let (tx, rx) = watch::channel::<Arc<str>>(Arc::from(""));
        let cancel = CancellationToken::new();

        let connection = Connection {
            tx,
            cancel: cancel.clone(),
        };
        if let Some(previous) = self.connections.insert(id.clone(), connection) {
            previous.cancel.cancel();
        }
        info!(connection = %id, "Subscriber connected");
        self.update_connection_gauge();

        // Registered first, so a broadcast racing with this one is not lost
        match self.snapshot() {
            Ok(payload) => {
                if let Some(connection) = self.connections.get(&id) {
                    connection.tx.send_replace(payload);
                }
            }
            Err(e) => error!(connection = %id, error = %e, "Failed to serialize apps"),
        }

        tokio::spawn(Arc::clone(self).send_loop(id, sink, rx, cancel))
    }

    async fn send_loop<S: SubscriberSink>(
        self: Arc<Self>,
        id: String,
        mut sink: S,
        mut rx: watch::Receiver<Arc<str>>,
        cancel: CancellationToken,
    ) {
        loop {
            let payload = rx.borrow_and_update().clone();
            if !payload.is_empty() {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = sink.send_text(payload) => result,
                };
                if let Err(e) = result {
                    warn!(connection = %id, error = %e, "Failed to write to subscriber");
                    if let Some(ref m) = self.metrics {
                        m.record_send_failure();
                    }
                    break;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                res = rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        // Only drop the entry this loop owns; a reconnect may reuse the id
        drop(rx);
        self.connections.remove_if(&id, |_, connection| connection.tx.is_closed());
        self.update_connection_gauge();

        sink.close().await;
        info!(connection = %id, "Subscriber disconnected");
    }

    /// Tear down a subscriber. No-op when it is not connected.
    pub fn disconnect(&self, id: &str) {
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.cancel.cancel();
            self.update_connection_gauge();
        }
    }

    /// Number of connected subscribers
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn update_connection_gauge(&self) {
        if let Some(ref m) = self.metrics {
            m.update_connection_count(self.connections.len());
        }
    }
}
