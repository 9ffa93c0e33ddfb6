//! Application records and groups as served to viewers.

use healthcheck::AppHealth;
use healthcheck::types::{DEFAULT_INTERVAL, DEFAULT_TIMEOUT};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

/// Icon repository used for icons given by name
pub const ICON_URL_PREFIX: &str = "https://cdn.jsdelivr.net/gh/walkxcode/dashboard-icons/svg/";

static ICON_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_-]+").expect("icon separator pattern is valid"));

/// A single dashboard entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub link: String,
    pub group: String,
    pub description: String,
    pub icon: String,
    pub healthcheck: AppHealthcheck,
}

/// Health check settings and transient health of an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppHealthcheck {
    pub enabled: bool,
    pub health: AppHealth,
    #[serde(rename = "poll_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AppHealthcheck {
    fn default() -> Self {
        Self {
            enabled: false,
            health: AppHealth::Unknown,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Named, name-ordered list of apps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppGroup {
    pub name: String,
    pub apps: Vec<App>,
}

impl AppGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            apps: Vec::new(),
        }
    }

    /// Insert keeping ascending name order
    pub fn insert(&mut self, app: App) {
        insert_ordered(&mut self.apps, app);
    }
}

/// Reason an app record was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppValidationError {
    #[error("name is required")]
    MissingName,
    #[error("link is required")]
    MissingLink,
    #[error("group is required")]
    MissingGroup,
}

/// All reasons an app record was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_errors(.0))]
pub struct InvalidApp(pub Vec<AppValidationError>);

fn join_errors(errors: &[AppValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl App {
    /// Check required fields and fill in defaults.
    ///
    /// Blank description falls back to the link, blank icon to the name; the
    /// icon is then resolved to a URL. Zero health check durations take the
    /// defaults.
    pub fn validate(mut self) -> Result<Self, InvalidApp> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(AppValidationError::MissingName);
        }
        if self.link.trim().is_empty() {
            errors.push(AppValidationError::MissingLink);
        }
        if self.group.trim().is_empty() {
            errors.push(AppValidationError::MissingGroup);
        }
        if !errors.is_empty() {
            return Err(InvalidApp(errors));
        }

        if self.description.trim().is_empty() {
            self.description = self.link.clone();
        }
        if self.icon.trim().is_empty() {
            self.icon = self.name.clone();
        }
        self.icon = resolve_icon(&self.icon);

        if self.healthcheck.interval.is_zero() {
            self.healthcheck.interval = DEFAULT_INTERVAL;
        }
        if self.healthcheck.timeout.is_zero() {
            self.healthcheck.timeout = DEFAULT_TIMEOUT;
        }

        Ok(self)
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.link)
    }
}

/// Turn an icon value into a URL.
///
/// Absolute URIs and absolute paths are kept as they are; anything else is
/// taken as an icon name and mapped into the icon repository.
pub fn resolve_icon(icon: &str) -> String {
    if icon.starts_with('/') || url::Url::parse(icon).is_ok() {
        return icon.to_string();
    }

    let normalized = ICON_SEPARATORS
        .replace_all(icon.trim(), "-")
        .to_lowercase();
    format!("{}{}.svg", ICON_URL_PREFIX, normalized)
}

/// Insert `app` after every entry whose name sorts before or equal to it.
pub fn insert_ordered(apps: &mut Vec<App>, app: App) {
    let index = apps.partition_point(|existing| existing.name <= app.name);
    apps.insert(index, app);
}
