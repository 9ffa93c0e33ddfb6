//! Integration tests for the websocket fan-out

use async_trait::async_trait;
use healthcheck::{HealthCheckResult, HealthChecker, HealthcheckRegistry};
use simplydash_server::provider::ProviderError;
use simplydash_server::{
    App, AppAggregator, AppGroup, AppHealthcheck, MetricsRegistry, Provider, SubscriberSink,
    WebsocketServer,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Provider whose list the test replaces at will
struct TestProvider {
    apps: Mutex<Arc<Vec<App>>>,
}

impl TestProvider {
    fn set(&self, names: &[&str]) {
        let apps = names
            .iter()
            .map(|name| App {
                name: name.to_string(),
                link: format!("http://{}.local", name.to_lowercase()),
                group: "tools".to_string(),
                description: String::new(),
                icon: String::new(),
                healthcheck: AppHealthcheck::default(),
            })
            .collect();
        *self.apps.lock().unwrap() = Arc::new(apps);
    }
}

impl Provider for TestProvider {
    fn id(&self) -> &str {
        "file-test"
    }

    fn apps(&self) -> Arc<Vec<App>> {
        self.apps.lock().unwrap().clone()
    }

    fn init(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

struct NeverChecked;

#[async_trait]
impl HealthChecker for NeverChecked {
    async fn check(&self, _url: &str, _timeout: Duration) -> HealthCheckResult {
        HealthCheckResult::from_status(Duration::ZERO, 200)
    }

    fn name(&self) -> &str {
        "never-checked"
    }
}

/// Sink forwarding payloads to the test, optionally slow or failing every write
struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
    delay: Duration,
    fail: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl SubscriberSink for ChannelSink {
    async fn send_text(&mut self, payload: Arc<str>) -> common::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(common::Error::transport("broken pipe"));
        }
        self.tx
            .send(payload.to_string())
            .map_err(common::Error::transport)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Subscriber {
    rx: mpsc::UnboundedReceiver<String>,
    fail: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Subscriber {
    fn new() -> (Self, ChannelSink) {
        Self::with_delay(Duration::ZERO)
    }

    /// Subscriber whose every write takes `delay`
    fn with_delay(delay: Duration) -> (Self, ChannelSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fail = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let sink = ChannelSink {
            tx,
            delay,
            fail: fail.clone(),
            closed: closed.clone(),
        };
        (Self { rx, fail, closed }, sink)
    }

    async fn next_names(&mut self) -> Vec<String> {
        let payload = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("no payload received")
            .expect("sink dropped");
        let groups: Vec<AppGroup> = serde_json::from_str(&payload).unwrap();
        groups
            .into_iter()
            .flat_map(|g| g.apps)
            .map(|a| a.name)
            .collect()
    }
}

struct Harness {
    provider: Arc<TestProvider>,
    provider_tx: mpsc::Sender<String>,
    websocket: Arc<WebsocketServer>,
    metrics: Arc<MetricsRegistry>,
}

impl Harness {
    fn start(names: &[&str]) -> Self {
        let provider = Arc::new(TestProvider {
            apps: Mutex::new(Arc::new(Vec::new())),
        });
        provider.set(names);

        let registry = Arc::new(HealthcheckRegistry::new(Arc::new(NeverChecked)));
        let (provider_tx, rx) = mpsc::channel(16);
        let metrics = Arc::new(MetricsRegistry::new());
        let aggregator = Arc::new(AppAggregator::new(
            Vec::new(),
            vec![provider.clone() as Arc<dyn Provider>],
            registry,
            rx,
            Some(metrics.clone()),
        ));

        let websocket = Arc::new(WebsocketServer::new(aggregator.clone(), Some(metrics.clone())));
        websocket.init();
        aggregator.init().unwrap();
        Self {
            provider,
            provider_tx,
            websocket,
            metrics,
        }
    }

    /// Replace the provider's list and announce it on the provider channel
    async fn publish(&self, names: &[&str]) {
        self.provider.set(names);
        self.provider_tx.send("file-test".to_string()).await.unwrap();
    }
}

#[tokio::test]
async fn test_connect_sends_snapshot() {
    let harness = Harness::start(&["Grafana", "Alpha"]);
    let (mut subscriber, sink) = Subscriber::new();

    harness.websocket.connect("ws-1", sink);

    assert_eq!(subscriber.next_names().await, vec!["Alpha", "Grafana"]);
    assert_eq!(harness.websocket.connection_count(), 1);
}

#[tokio::test]
async fn test_broadcast_reaches_every_subscriber() {
    let harness = Harness::start(&["Alpha"]);
    let (mut first, first_sink) = Subscriber::new();
    let (mut second, second_sink) = Subscriber::new();

    harness.websocket.connect("ws-1", first_sink);
    harness.websocket.connect("ws-2", second_sink);
    first.next_names().await;
    second.next_names().await;

    harness.publish(&["Alpha", "Beta"]).await;

    for subscriber in [&mut first, &mut second] {
        loop {
            let names = subscriber.next_names().await;
            if names == vec!["Alpha", "Beta"] {
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_slow_subscriber_skips_to_latest() {
    let harness = Harness::start(&["A0"]);
    let (mut subscriber, sink) = Subscriber::with_delay(Duration::from_millis(200));

    harness.websocket.connect("ws-slow", sink);
    assert_eq!(subscriber.next_names().await, vec!["A0"]);

    for i in 1..=10 {
        let name = format!("A{}", i);
        harness.publish(&[name.as_str()]).await;
    }

    let mut delivered = Vec::new();
    loop {
        let names = subscriber.next_names().await;
        delivered.push(names.clone());
        if names == vec!["A10"] {
            break;
        }
    }
    assert!(
        delivered.len() <= 3,
        "intermediate states should be skipped, got {:?}",
        delivered
    );

    // Nothing older trails the newest state
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(payload) = subscriber.rx.try_recv() {
        assert!(payload.contains(r#""A10""#), "stale payload {}", payload);
    }
}

#[tokio::test]
async fn test_failed_write_tears_down_only_that_subscriber() {
    let harness = Harness::start(&["Alpha"]);
    let (mut healthy, healthy_sink) = Subscriber::new();
    let (mut broken, broken_sink) = Subscriber::new();

    harness.websocket.connect("ws-ok", healthy_sink);
    let broken_task = harness.websocket.connect("ws-broken", broken_sink);
    healthy.next_names().await;
    broken.next_names().await;

    broken.fail.store(true, Ordering::SeqCst);
    harness.publish(&["Alpha", "Beta"]).await;

    tokio::time::timeout(Duration::from_secs(2), broken_task)
        .await
        .expect("send loop should end on write failure")
        .unwrap();
    assert!(broken.closed.load(Ordering::SeqCst));
    assert_eq!(harness.websocket.connection_count(), 1);
    assert!(!healthy.closed.load(Ordering::SeqCst));

    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &harness.metrics.registry).unwrap();
    assert!(buffer.contains("simplydash_websocket_send_failures_total 1"));
    assert!(buffer.contains("simplydash_websocket_connections 1"));
}

#[tokio::test]
async fn test_disconnect() {
    let harness = Harness::start(&["Alpha"]);
    let (mut subscriber, sink) = Subscriber::new();

    let task = harness.websocket.connect("ws-1", sink);
    subscriber.next_names().await;

    harness.websocket.disconnect("ws-1");
    harness.websocket.disconnect("ws-unknown");

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("send loop should end on disconnect")
        .unwrap();
    assert!(subscriber.closed.load(Ordering::SeqCst));
    assert_eq!(harness.websocket.connection_count(), 0);
}
