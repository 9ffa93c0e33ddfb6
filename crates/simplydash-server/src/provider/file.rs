//! Apps declared in a YAML file, reloaded when the file changes.

use super::{AppCache, Provider, ProviderError, collect_valid};
use crate::config::FileProviderSettings;
use crate::types::{App, AppHealthcheck};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One entry of the apps file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AppEntry {
    name: String,
    description: String,
    group: String,
    link: String,
    icon: String,
    healthcheck: HealthcheckEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct HealthcheckEntry {
    enable: bool,
    #[serde(with = "humantime_serde")]
    interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl From<AppEntry> for App {
    fn from(entry: AppEntry) -> Self {
        App {
            name: entry.name,
            link: entry.link,
            group: entry.group,
            description: entry.description,
            icon: entry.icon,
            healthcheck: AppHealthcheck {
                enabled: entry.healthcheck.enable,
                interval: entry.healthcheck.interval.unwrap_or_default(),
                timeout: entry.healthcheck.timeout.unwrap_or_default(),
                ..AppHealthcheck::default()
            },
        }
    }
}

/// Decode the apps file.
///
/// The document must be a sequence (or empty). Entries that fail to decode
/// are logged and skipped.
fn parse_entries(provider: &str, contents: &str) -> Result<Vec<App>, ProviderError> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    let values: Option<Vec<serde_yaml::Value>> = serde_yaml::from_str(contents)?;
    let mut apps = Vec::new();
    for (index, value) in values.unwrap_or_default().into_iter().enumerate() {
        match serde_yaml::from_value::<AppEntry>(value) {
            Ok(entry) => apps.push(entry.into()),
            Err(e) => error!(provider = %provider, index, error = %e, "Invalid app entry"),
        }
    }
    Ok(apps)
}

/// Provider reading a YAML file of apps
pub struct FileProvider {
    cache: Arc<AppCache>,
    path: PathBuf,
    started: AtomicBool,
}

impl FileProvider {
    pub fn new(name: &str, settings: FileProviderSettings, notify_tx: mpsc::Sender<String>) -> Self {
        Self {
            cache: Arc::new(AppCache::new(format!("file-{}", name), notify_tx)),
            path: PathBuf::from(settings.path.trim()),
            started: AtomicBool::new(false),
        }
    }

    fn start(&self) -> Result<(), ProviderError> {
        let path = std::path::absolute(&self.path)?;
        let (dir, file_name) = match (path.parent(), path.file_name()) {
            (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_os_string()),
            _ => {
                return Err(ProviderError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", path.display()),
                )));
            }
        };

        // Single-slot trigger: events arriving while a reload is pending collapse
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
        let provider = self.cache.id().to_string();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, &file_name) {
                    let _ = trigger_tx.try_send(());
                }
            }
            Err(e) => warn!(provider = %provider, error = %e, "File watch error"),
        })?;

        // The parent is watched so that replace-by-rename is seen as well
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(provider = %self.cache.id(), path = %path.display(), "Starting file provider");
        tokio::spawn(watch(self.cache.clone(), path, watcher, trigger_rx));
        Ok(())
    }
}

impl Provider for FileProvider {
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
        // A failed start may be retried
        self.start()
            .inspect_err(|_| self.started.store(false, Ordering::SeqCst))
    }
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

async fn watch(
    cache: Arc<AppCache>,
    path: PathBuf,
    _watcher: RecommendedWatcher,
    mut trigger_rx: mpsc::Receiver<()>,
) {
    reload(&cache, &path).await;

    while trigger_rx.recv().await.is_some() {
        debug!(provider = %cache.id(), "Apps file changed");
        reload(&cache, &path).await;
    }
}

/// Re-read the file and refresh the cache. Unreadable or malformed files
/// keep the last known list.
async fn reload(cache: &AppCache, path: &Path) -> bool {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            error!(provider = %cache.id(), path = %path.display(), error = %e, "Failed to read apps file");
            return false;
        }
    };

    let raw = match parse_entries(cache.id(), &contents) {
        Ok(raw) => raw,
        Err(e) => {
            error!(provider = %cache.id(), path = %path.display(), error = %e, "Failed to parse apps file");
            return false;
        }
    };

    cache.replace(collect_valid(cache.id(), raw)).await
}
