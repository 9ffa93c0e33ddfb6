//! Configuration loading and validation for simplydash

use crate::provider::docker::parse_host;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "SIMPLYDASH_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub app: AppSettings,

    #[serde(default)]
    pub providers: ProviderSettings,

    #[serde(default)]
    pub channels: ChannelSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.server.validate()?;
        self.app.validate()?;
        self.providers.validate()?;
        self.channels.validate()?;
        Ok(())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,

    /// Log every HTTP request
    pub access_logs: bool,
}

/// Dashboard layout settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppSettings {
    /// Known groups, shown first and in this order
    #[validate(custom = "validate_groups")]
    pub groups: Vec<String>,
}

/// Discovery backends, keyed by provider name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub docker: BTreeMap<String, DockerProviderSettings>,
    pub file: BTreeMap<String, FileProviderSettings>,
}

impl Validate for ProviderSettings {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        for docker in self.docker.values() {
            docker.validate()?;
        }
        for file in self.file.values() {
            file.validate()?;
        }
        Ok(())
    }
}

/// Docker Engine API provider
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DockerProviderSettings {
    #[validate(custom = "validate_docker_host")]
    pub host: String,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_poll_interval")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_api_timeout")]
    pub timeout: Duration,
}

/// Declarative YAML file provider
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FileProviderSettings {
    #[validate(custom = "validate_file_path")]
    pub path: String,
}

/// Channel buffer size settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ChannelSettings {
    #[validate(range(min = 1, max = 1024))]
    pub provider_updates: usize,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// Prometheus metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            access_logs: false,
        }
    }
}

impl Default for DockerProviderSettings {
    fn default() -> Self {
        Self {
            host: "unix:///var/run/docker.sock".to_string(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            provider_updates: 16,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// Custom validators

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.trim()
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_groups(groups: &[String]) -> Result<(), ValidationError> {
    if groups.iter().any(|g| g.trim().is_empty()) {
        return Err(ValidationError::new("group_name_empty"));
    }
    Ok(())
}

fn validate_docker_host(host: &str) -> Result<(), ValidationError> {
    parse_host(host)
        .map(|_| ())
        .map_err(|_| ValidationError::new("docker_host_invalid"))
}

fn validate_poll_interval(interval: &Duration) -> Result<(), ValidationError> {
    let secs = interval.as_secs();
    if !(1..=3600).contains(&secs) {
        return Err(ValidationError::new("poll_interval_out_of_range"));
    }
    Ok(())
}

fn validate_api_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() {
        return Err(ValidationError::new("api_timeout_zero"));
    }
    Ok(())
}

fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.trim().is_empty() {
        return Err(ValidationError::new("file_path_empty"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `$SIMPLYDASH_CONFIG` or the default search paths
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path));
            }
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(&path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/simplydash/config.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./config.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/simplydash/config.yaml"))
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen_addr.trim().parse().map_err(|_| {
            let mut errors = validator::ValidationErrors::new();
            errors.add("listen_addr", ValidationError::new("listen_addr_invalid"));
            ConfigError::ValidationError(errors)
        })
    }
}
