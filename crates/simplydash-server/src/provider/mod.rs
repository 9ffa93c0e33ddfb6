//! Sources of app records.
//!
//! A provider owns its own refresh loop and keeps an ordered, validated
//! cache of apps. When a refresh yields a list that differs from the cached
//! one, the new list is swapped in and the provider id is sent on the shared
//! notification channel.

pub mod docker;
pub mod file;

use crate::config::ProviderSettings;
use crate::types::{App, insert_ordered};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

pub use docker::{ContainerSource, ContainerSummary, DockerApiClient, DockerProvider};
pub use file::FileProvider;

/// Provider error types
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Docker API request failed: {0}")]
    Docker(#[from] reqwest::Error),

    #[error("Docker socket request failed: {0}")]
    Socket(#[from] hyper::Error),

    #[error("Invalid Docker API request: {0}")]
    Request(#[from] http::Error),

    #[error("Docker API returned status {0}")]
    Api(u16),

    #[error("Docker API did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid Docker API response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported docker host: {0}")]
    InvalidHost(String),

    #[error("Invalid apps file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Provider already initialized")]
    AlreadyInitialized,
}

impl From<ProviderError> for common::Error {
    fn from(e: ProviderError) -> Self {
        common::Error::provider(e)
    }
}

/// A source of app records
pub trait Provider: Send + Sync {
    /// Stable identifier, e.g. `docker-local` or `file-main`
    fn id(&self) -> &str;

    /// Current cached apps in ascending name order. Never blocks on I/O.
    fn apps(&self) -> Arc<Vec<App>>;

    /// Start the background refresh. Returns once the loop is spawned.
    fn init(&self) -> Result<(), ProviderError>;
}

/// Last-known-good app list of one provider
pub struct AppCache {
    id: String,
    apps: watch::Sender<Arc<Vec<App>>>,
    notify_tx: mpsc::Sender<String>,
}

impl AppCache {
    pub fn new(id: impl Into<String>, notify_tx: mpsc::Sender<String>) -> Self {
        let (apps, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            id: id.into(),
            apps,
            notify_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current list
    pub fn snapshot(&self) -> Arc<Vec<App>> {
        self.apps.borrow().clone()
    }

    /// Swap in `apps` if it differs from the cached list and announce it.
    ///
    /// Returns whether the list changed.
    pub async fn replace(&self, apps: Vec<App>) -> bool {
        let changed = self.apps.send_if_modified(|current| {
            if current.as_slice() == apps.as_slice() {
                false
            } else {
                *current = Arc::new(apps);
                true
            }
        });

        if !changed {
            debug!(provider = %self.id, "App list unchanged");
            return false;
        }

        debug!(provider = %self.id, apps = self.apps.borrow().len(), "App list changed");
        if self.notify_tx.send(self.id.clone()).await.is_err() {
            warn!(provider = %self.id, "Update listener is gone");
        }
        true
    }
}

/// Validate raw records, dropping and logging invalid ones, and order the rest.
pub fn collect_valid(provider: &str, raw: impl IntoIterator<Item = App>) -> Vec<App> {
    let mut apps = Vec::new();
    for app in raw {
        let name = app.name.clone();
        match app.validate() {
            Ok(app) => insert_ordered(&mut apps, app),
            Err(e) => error!(provider = %provider, app = %name, error = %e, "Invalid app entry"),
        }
    }
    apps
}

/// Create every configured provider. Docker providers come first, each kind
/// ordered by name.
pub fn build_providers(
    settings: &ProviderSettings,
    notify_tx: mpsc::Sender<String>,
) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    for (name, docker) in &settings.docker {
        providers.push(Arc::new(DockerProvider::new(
            name,
            docker.clone(),
            notify_tx.clone(),
        )));
    }

    for (name, file) in &settings.file {
        providers.push(Arc::new(FileProvider::new(name, file.clone(), notify_tx.clone())));
    }

    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DockerProviderSettings, FileProviderSettings};
    use crate::types::AppHealthcheck;

    fn app(name: &str, link: &str) -> App {
        App {
            name: name.to_string(),
            link: link.to_string(),
            group: "tools".to_string(),
            description: String::new(),
            icon: String::new(),
            healthcheck: AppHealthcheck::default(),
        }
    }

    #[tokio::test]
    async fn test_replace_notifies_only_on_change() {
        let (tx, mut rx) = mpsc::channel(4);
        let cache = AppCache::new("file-test", tx);

        let apps = collect_valid("file-test", vec![app("B", "http://b"), app("A", "http://a")]);
        assert!(cache.replace(apps.clone()).await);
        assert_eq!(rx.recv().await.as_deref(), Some("file-test"));

        // Identical list: no notification
        assert!(!cache.replace(apps).await);
        assert!(rx.try_recv().is_err());

        let names: Vec<_> = cache.snapshot().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_replace_empty_list_is_unchanged_initially() {
        let (tx, mut rx) = mpsc::channel(1);
        let cache = AppCache::new("file-test", tx);

        assert!(!cache.replace(Vec::new()).await);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_collect_valid_drops_invalid() {
        let apps = collect_valid(
            "file-test",
            vec![app("Good", "http://good"), app("", "http://nameless"), app("Linkless", "")],
        );
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "Good");
        assert_eq!(apps[0].description, "http://good");
    }

    #[tokio::test]
    async fn test_build_providers_order() {
        let mut settings = ProviderSettings::default();
        settings.file.insert(
            "main".to_string(),
            FileProviderSettings {
                path: "apps.yaml".to_string(),
            },
        );
        settings
            .docker
            .insert("remote".to_string(), DockerProviderSettings::default());
        settings
            .docker
            .insert("local".to_string(), DockerProviderSettings::default());

        let (tx, _rx) = mpsc::channel(1);
        let ids: Vec<_> = build_providers(&settings, tx)
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["docker-local", "docker-remote", "file-main"]);
    }
}
