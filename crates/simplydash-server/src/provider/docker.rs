//! Apps discovered from container labels through the Docker Engine API.

use super::{AppCache, Provider, ProviderError, collect_valid};
use crate::config::DockerProviderSettings;
use crate::types::{App, AppHealthcheck};
use async_trait::async_trait;
use bytes::Bytes;
use healthcheck::types::{DEFAULT_INTERVAL, DEFAULT_TIMEOUT};
#[cfg(unix)]
use http_body_util::{BodyExt, Empty};
#[cfg(unix)]
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const LABEL_ENABLE: &str = "simplydash.enable";
pub const LABEL_NAME: &str = "simplydash.name";
pub const LABEL_LINK: &str = "simplydash.link";
pub const LABEL_GROUP: &str = "simplydash.group";
pub const LABEL_ICON: &str = "simplydash.icon";
pub const LABEL_DESCRIPTION: &str = "simplydash.description";
pub const LABEL_HEALTHCHECK_ENABLE: &str = "simplydash.healthcheck.enable";
pub const LABEL_HEALTHCHECK_INTERVAL: &str = "simplydash.healthcheck.interval";
pub const LABEL_HEALTHCHECK_TIMEOUT: &str = "simplydash.healthcheck.timeout";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Container as returned by `GET /containers/json`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl ContainerSummary {
    fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }
}

/// Lists containers carrying a label
#[async_trait]
pub trait ContainerSource: Send + Sync {
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, ProviderError>;
}

/// Where the Docker Engine API listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    /// Base URL of a TCP endpoint
    Http(String),
    /// Path of a unix domain socket
    Unix(PathBuf),
}

/// Docker Engine API client over TCP or a unix socket
pub struct DockerApiClient {
    transport: Transport,
    timeout: Duration,
}

enum Transport {
    Http {
        client: reqwest::Client,
        base_url: String,
    },
    Unix(PathBuf),
}

impl DockerApiClient {
    pub fn new(settings: &DockerProviderSettings) -> Result<Self, ProviderError> {
        let transport = match parse_host(&settings.host)? {
            DockerEndpoint::Http(base_url) => Transport::Http {
                client: reqwest::Client::builder()
                    .timeout(settings.timeout)
                    .build()?,
                base_url,
            },
            DockerEndpoint::Unix(socket) => Transport::Unix(socket),
        };
        Ok(Self {
            transport,
            timeout: settings.timeout,
        })
    }
}

#[async_trait]
impl ContainerSource for DockerApiClient {
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, ProviderError> {
        let path = containers_path(label);

        match &self.transport {
            Transport::Http { client, base_url } => {
                let response = client.get(format!("{}{}", base_url, path)).send().await?;

                let status = response.status();
                if !status.is_success() {
                    return Err(ProviderError::Api(status.as_u16()));
                }
                Ok(response.json().await?)
            }
            Transport::Unix(socket) => {
                let (status, body) = tokio::time::timeout(self.timeout, get_unix(socket, &path))
                    .await
                    .map_err(|_| ProviderError::Timeout(self.timeout))??;

                if !(200..300).contains(&status) {
                    return Err(ProviderError::Api(status));
                }
                Ok(serde_json::from_slice(&body)?)
            }
        }
    }
}

/// `/containers/json` path and query listing every container carrying `label`
fn containers_path(label: &str) -> String {
    let filters = serde_json::json!({ "label": [label] }).to_string();
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("all", "true")
        .append_pair("filters", &filters)
        .finish();
    format!("/containers/json?{}", query)
}

/// One HTTP/1.1 GET over a fresh unix socket connection
#[cfg(unix)]
async fn get_unix(socket: &Path, path: &str) -> Result<(u16, Bytes), ProviderError> {
    let stream = tokio::net::UnixStream::connect(socket).await?;
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Docker socket connection ended");
        }
    });

    let request = http::Request::get(path)
        .header(http::header::HOST, "docker")
        .body(Empty::<Bytes>::new())?;
    let response = sender.send_request(request).await?;
    let status = response.status().as_u16();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, body))
}

#[cfg(not(unix))]
async fn get_unix(socket: &Path, _path: &str) -> Result<(u16, Bytes), ProviderError> {
    Err(ProviderError::InvalidHost(format!("unix://{}", socket.display())))
}

/// Parse a docker host setting.
///
/// `tcp://` becomes an `http://` base URL, `http://` and `https://` are kept,
/// `unix://` names an absolute socket path.
pub fn parse_host(host: &str) -> Result<DockerEndpoint, ProviderError> {
    let host = host.trim();
    if let Some(socket) = host.strip_prefix("unix://") {
        return if socket.starts_with('/') && socket.len() > 1 {
            Ok(DockerEndpoint::Unix(PathBuf::from(socket)))
        } else {
            Err(ProviderError::InvalidHost(host.to_string()))
        };
    }

    let host = host.trim_end_matches('/');
    let base = if let Some(rest) = host.strip_prefix("tcp://") {
        format!("http://{}", rest)
    } else if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        return Err(ProviderError::InvalidHost(host.to_string()));
    };

    match url::Url::parse(&base) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(DockerEndpoint::Http(base)),
        _ => Err(ProviderError::InvalidHost(host.to_string())),
    }
}

/// Provider polling the Docker Engine for labelled containers
pub struct DockerProvider {
    cache: Arc<AppCache>,
    settings: DockerProviderSettings,
    source: Option<Arc<dyn ContainerSource>>,
    started: AtomicBool,
}

impl DockerProvider {
    pub fn new(
        name: &str,
        settings: DockerProviderSettings,
        notify_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            cache: Arc::new(AppCache::new(format!("docker-{}", name), notify_tx)),
            settings,
            source: None,
            started: AtomicBool::new(false),
        }
    }

    /// Use `source` instead of the Docker Engine API
    pub fn with_source(mut self, source: Arc<dyn ContainerSource>) -> Self {
        self.source = Some(source);
        self
    }

    fn start(&self) -> Result<(), ProviderError> {
        let source: Arc<dyn ContainerSource> = match &self.source {
            Some(source) => source.clone(),
            None => Arc::new(DockerApiClient::new(&self.settings)?),
        };

        let interval = if self.settings.interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            self.settings.interval
        };

        info!(provider = %self.cache.id(), host = %self.settings.host, interval = ?interval, "Starting docker provider");
        tokio::spawn(poll(self.cache.clone(), source, interval));
        Ok(())
    }
}

impl Provider for DockerProvider {
    fn id(&self) -> &str {
        self.cache.id()
    }

    fn apps(&self) -> Arc<Vec<App>> {
        self.cache.snapshot()
    }

    fn init(&self) -> Result<(), ProviderError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProviderError::AlreadyInitialized);
        }
        self.start()
            .inspect_err(|_| self.started.store(false, Ordering::SeqCst))
    }
}

async fn poll(cache: Arc<AppCache>, source: Arc<dyn ContainerSource>, interval: Duration) {
    // First tick completes immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        fetch(&cache, source.as_ref()).await;
    }
}

/// List containers once and refresh the cache. A failed listing keeps the
/// last known list.
pub async fn fetch(cache: &AppCache, source: &dyn ContainerSource) -> bool {
    let containers = match source.list_containers(LABEL_ENABLE).await {
        Ok(containers) => containers,
        Err(e) => {
            error!(provider = %cache.id(), error = %e, "Failed to list containers");
            return false;
        }
    };

    debug!(provider = %cache.id(), containers = containers.len(), "Listed containers");
    let apps = collect_valid(cache.id(), containers.iter().map(container_to_app));
    cache.replace(apps).await
}

/// Build an app from a container's labels
pub fn container_to_app(container: &ContainerSummary) -> App {
    let text = |key: &str| container.label(key).unwrap_or_default().to_string();

    App {
        name: text(LABEL_NAME),
        link: text(LABEL_LINK),
        group: text(LABEL_GROUP),
        description: text(LABEL_DESCRIPTION),
        icon: text(LABEL_ICON),
        healthcheck: AppHealthcheck {
            enabled: bool_from_label(container, LABEL_HEALTHCHECK_ENABLE, false),
            interval: duration_from_label(container, LABEL_HEALTHCHECK_INTERVAL, DEFAULT_INTERVAL),
            timeout: duration_from_label(container, LABEL_HEALTHCHECK_TIMEOUT, DEFAULT_TIMEOUT),
            ..AppHealthcheck::default()
        },
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn bool_from_label(container: &ContainerSummary, label: &str, default: bool) -> bool {
    let Some(value) = container.label(label) else {
        return default;
    };

    parse_bool(value).unwrap_or_else(|| {
        warn!(container = %container.id, label = %label, value = %value, "Invalid bool label");
        default
    })
}

fn duration_from_label(container: &ContainerSummary, label: &str, default: Duration) -> Duration {
    let Some(value) = container.label(label) else {
        return default;
    };

    match humantime::parse_duration(value.trim()) {
        Ok(duration) if !duration.is_zero() => duration,
        Ok(_) => {
            warn!(container = %container.id, label = %label, "Expected positive duration label");
            default
        }
        Err(e) => {
            warn!(container = %container.id, label = %label, value = %value, error = %e, "Invalid duration label");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves a fixed container list, or fails when empty-handed
    struct StubSource {
        containers: Mutex<Option<Vec<ContainerSummary>>>,
    }

    impl StubSource {
        fn new(containers: Vec<ContainerSummary>) -> Arc<Self> {
            Arc::new(Self {
                containers: Mutex::new(Some(containers)),
            })
        }

        fn fail(&self) {
            *self.containers.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl ContainerSource for StubSource {
        async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, ProviderError> {
            assert_eq!(label, LABEL_ENABLE);
            self.containers
                .lock()
                .unwrap()
                .clone()
                .ok_or(ProviderError::Api(500))
        }
    }

    fn container(id: &str, labels: &[(&str, &str)]) -> ContainerSummary {
        ContainerSummary {
            id: id.to_string(),
            names: vec![format!("/{}", id)],
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    fn grafana() -> ContainerSummary {
        container(
            "c1",
            &[
                (LABEL_ENABLE, "true"),
                (LABEL_NAME, "Grafana"),
                (LABEL_LINK, "http://grafana.local"),
                (LABEL_GROUP, "monitoring"),
                (LABEL_HEALTHCHECK_ENABLE, "T"),
                (LABEL_HEALTHCHECK_INTERVAL, "5s"),
            ],
        )
    }

    #[test]
    fn test_container_to_app() {
        let app = container_to_app(&grafana());
        assert_eq!(app.name, "Grafana");
        assert_eq!(app.link, "http://grafana.local");
        assert_eq!(app.group, "monitoring");
        assert!(app.healthcheck.enabled);
        assert_eq!(app.healthcheck.interval, Duration::from_secs(5));
        assert_eq!(app.healthcheck.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_invalid_labels_fall_back_to_defaults() {
        let c = container(
            "c2",
            &[
                (LABEL_HEALTHCHECK_ENABLE, "yes"),
                (LABEL_HEALTHCHECK_INTERVAL, "soon"),
                (LABEL_HEALTHCHECK_TIMEOUT, "0s"),
            ],
        );
        let app = container_to_app(&c);
        assert!(!app.healthcheck.enabled);
        assert_eq!(app.healthcheck.interval, DEFAULT_INTERVAL);
        assert_eq!(app.healthcheck.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_container_without_labels() {
        let c = ContainerSummary {
            id: "bare".to_string(),
            ..Default::default()
        };
        let app = container_to_app(&c);
        assert!(app.name.is_empty());
        assert!(!app.healthcheck.enabled);
    }

    #[test]
    fn test_parse_bool() {
        for value in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(value), Some(true), "{}", value);
        }
        for value in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(value), Some(false), "{}", value);
        }
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool("tRuE"), None);
    }

    #[test]
    fn test_parse_host() {
        assert_eq!(
            parse_host("tcp://127.0.0.1:2375").unwrap(),
            DockerEndpoint::Http("http://127.0.0.1:2375".to_string())
        );
        assert_eq!(
            parse_host("https://docker.local:2376/").unwrap(),
            DockerEndpoint::Http("https://docker.local:2376".to_string())
        );
        assert_eq!(
            parse_host("unix:///var/run/docker.sock").unwrap(),
            DockerEndpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert!(matches!(parse_host("unix://"), Err(ProviderError::InvalidHost(_))));
        assert!(matches!(parse_host("unix://docker.sock"), Err(ProviderError::InvalidHost(_))));
        assert!(parse_host("tcp://").is_err());
        assert!(parse_host("ftp://docker:2375").is_err());
    }

    #[test]
    fn test_containers_path() {
        assert_eq!(
            containers_path(LABEL_ENABLE),
            "/containers/json?all=true&filters=%7B%22label%22%3A%5B%22simplydash.enable%22%5D%7D"
        );
    }

    /// Answer one request on a unix socket with a canned response
    #[cfg(unix)]
    fn serve_once(socket: &Path, status: &'static str, body: &'static str) -> tokio::task::JoinHandle<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::UnixListener::bind(socket).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8(request).unwrap()
        })
    }

    #[cfg(unix)]
    fn unix_client(socket: &Path) -> DockerApiClient {
        DockerApiClient::new(&DockerProviderSettings {
            host: format!("unix://{}", socket.display()),
            ..Default::default()
        })
        .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_containers_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let server = serve_once(
            &socket,
            "200 OK",
            r#"[{"Id": "abc", "Names": ["/grafana"], "Labels": {"simplydash.name": "Grafana"}}]"#,
        );

        let containers = unix_client(&socket).list_containers(LABEL_ENABLE).await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].label(LABEL_NAME), Some("Grafana"));

        let request = server.await.unwrap();
        let expected = format!("GET {} HTTP/1.1\r\n", containers_path(LABEL_ENABLE));
        assert!(request.starts_with(&expected), "{}", request);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let _server = serve_once(&socket, "500 Internal Server Error", r#"{"message": "boom"}"#);

        let result = unix_client(&socket).list_containers(LABEL_ENABLE).await;
        assert!(matches!(result, Err(ProviderError::Api(500))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = unix_client(&dir.path().join("absent.sock"))
            .list_containers(LABEL_ENABLE)
            .await;
        assert!(matches!(result, Err(ProviderError::Io(_))));
    }

    #[test]
    fn test_container_summary_json() {
        let json = r#"[
            {"Id": "abc", "Names": ["/grafana"], "Labels": {"simplydash.name": "Grafana"}},
            {"Id": "def", "Names": ["/bare"], "Labels": null}
        ]"#;
        let containers: Vec<ContainerSummary> = serde_json::from_str(json).unwrap();
        assert_eq!(containers[0].label(LABEL_NAME), Some("Grafana"));
        assert_eq!(containers[1].label(LABEL_NAME), None);
    }

    #[tokio::test]
    async fn test_fetch_drops_invalid_and_dedups() {
        let nameless = container("c3", &[(LABEL_LINK, "http://x"), (LABEL_GROUP, "g")]);
        let source = StubSource::new(vec![grafana(), nameless]);
        let (tx, mut rx) = mpsc::channel(4);
        let cache = AppCache::new("docker-test", tx);

        assert!(fetch(&cache, source.as_ref()).await);
        assert_eq!(rx.recv().await.as_deref(), Some("docker-test"));
        assert_eq!(cache.snapshot().len(), 1);

        // Same containers again: no notification
        assert!(!fetch(&cache, source.as_ref()).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_last_list() {
        let source = StubSource::new(vec![grafana()]);
        let (tx, _rx) = mpsc::channel(4);
        let cache = AppCache::new("docker-test", tx);

        fetch(&cache, source.as_ref()).await;
        source.fail();
        assert!(!fetch(&cache, source.as_ref()).await);
        assert_eq!(cache.snapshot()[0].name, "Grafana");
    }

    #[tokio::test]
    async fn test_init_polls_immediately() {
        let (tx, mut rx) = mpsc::channel(4);
        let provider = DockerProvider::new("local", DockerProviderSettings::default(), tx)
            .with_source(StubSource::new(vec![grafana()]));

        provider.init().unwrap();
        let id = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first poll should run immediately");
        assert_eq!(id.as_deref(), Some("docker-local"));
        assert_eq!(provider.apps()[0].name, "Grafana");

        assert!(matches!(
            provider.init(),
            Err(ProviderError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_init_with_bad_host_can_fail_again() {
        let (tx, _rx) = mpsc::channel(4);
        let settings = DockerProviderSettings {
            host: "ftp://docker:2375".to_string(),
            ..Default::default()
        };
        let provider = DockerProvider::new("remote", settings, tx);

        assert!(matches!(provider.init(), Err(ProviderError::InvalidHost(_))));
        assert!(matches!(provider.init(), Err(ProviderError::InvalidHost(_))));
    }
}
