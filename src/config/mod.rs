//! Configuration management for CLI, environment variables, and config files.

use crate::error::{DavError, DavResult};
use crate::types::FolderNaming;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for debrid-dav.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// One entry per configured debrid provider account
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Configuration for the WebDAV listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Optional HTTP Basic auth; requests are unauthenticated when unset
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Configuration for cache refresh cadence and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory snapshots are persisted under, one subdirectory per backend
    pub root: PathBuf,
    /// Seconds between incremental torrent refresh passes
    pub refresh_interval_secs: u64,
    /// Seconds between download-link refresh passes
    pub link_refresh_interval_secs: u64,
    /// Lifetime assumed for resolved links whose provider reports no expiry
    pub default_link_ttl_secs: u64,
    /// Worker count for the startup full sync; 0 picks from available cores
    pub sync_workers: usize,
}

/// Configuration for logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Configuration for a single debrid provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Name the backend is exposed under; becomes a top-level directory
    pub name: String,
    /// Base URL of the provider REST API
    pub url: String,
    /// API token, sent as a bearer credential
    pub token: String,
    #[serde(default)]
    pub folder_naming: FolderNaming,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8280,
            username: None,
            password: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/var/cache"))
                .join("debrid-dav"),
            refresh_interval_secs: 5,
            link_refresh_interval_secs: 1800,
            default_link_ttl_secs: 1800,
            sync_workers: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn link_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.link_refresh_interval_secs)
    }

    pub fn default_link_ttl(&self) -> Duration {
        Duration::from_secs(self.default_link_ttl_secs)
    }

    /// Effective worker count for the startup full sync.
    pub fn effective_sync_workers(&self) -> usize {
        if self.sync_workers > 0 {
            return self.sync_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2)
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> DavResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DavError::IoError(e.to_string()))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| DavError::ParseError(e.to_string()))
            }
            _ => toml::from_str(&content).map_err(|e| DavError::ParseError(e.to_string())),
        }
    }

    pub fn from_default_locations() -> DavResult<Self> {
        if let Ok(path) = std::env::var("DEBRID_DAV_CONFIG") {
            return Self::from_file(&PathBuf::from(path));
        }

        let config_dirs = [
            dirs::config_dir().map(|d| d.join("debrid-dav/config.toml")),
            Some(PathBuf::from("/etc/debrid-dav/config.toml")),
            Some(PathBuf::from("./debrid-dav.toml")),
        ];

        for path in config_dirs.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> DavResult<Self> {
        if let Ok(val) = std::env::var("DEBRID_DAV_BIND") {
            self.server.bind = val;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_PORT") {
            self.server.port = val.parse().map_err(|_| {
                DavError::InvalidArgument("DEBRID_DAV_PORT has invalid format".into())
            })?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_CACHE_ROOT") {
            self.cache.root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_REFRESH_INTERVAL") {
            self.cache.refresh_interval_secs = val.parse().map_err(|_| {
                DavError::InvalidArgument("DEBRID_DAV_REFRESH_INTERVAL has invalid format".into())
            })?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_LINK_REFRESH_INTERVAL") {
            self.cache.link_refresh_interval_secs = val.parse().map_err(|_| {
                DavError::InvalidArgument(
                    "DEBRID_DAV_LINK_REFRESH_INTERVAL has invalid format".into(),
                )
            })?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_LOG_LEVEL") {
            self.logging.level = val;
        }

        // Auth credentials - support both individual fields and combined format
        if let Ok(auth_str) = std::env::var("DEBRID_DAV_AUTH_USERPASS") {
            // Combined format: "username:password"
            if let Some((username, password)) = auth_str.split_once(':') {
                self.server.username = Some(username.to_string());
                self.server.password = Some(password.to_string());
            }
        } else {
            // Individual fields
            if let Ok(val) = std::env::var("DEBRID_DAV_AUTH_USERNAME") {
                self.server.username = Some(val);
            }
            if let Ok(val) = std::env::var("DEBRID_DAV_AUTH_PASSWORD") {
                self.server.password = Some(val);
            }
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(ref bind) = cli.bind {
            self.server.bind = bind.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref root) = cli.cache_root {
            self.cache.root = root.clone();
        }
        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }
        self
    }

    pub fn load() -> DavResult<Self> {
        Self::from_default_locations()?.merge_from_env()
    }

    pub fn load_with_cli(cli: &CliArgs) -> DavResult<Self> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> DavResult<()> {
        let mut issues = Vec::new();

        if self.server.bind.is_empty() {
            issues.push("server.bind: bind address cannot be empty".to_string());
        }

        if !self.cache.root.is_absolute() {
            issues.push("cache.root: cache root must be an absolute path".to_string());
        }
        if self.cache.refresh_interval_secs == 0 {
            issues.push("cache.refresh_interval_secs: must be at least 1".to_string());
        }
        if self.cache.default_link_ttl_secs == 0 {
            issues.push("cache.default_link_ttl_secs: must be at least 1".to_string());
        }

        if self.server.username.is_some() != self.server.password.is_some() {
            issues.push(
                "server: username and password must be set together or not at all".to_string(),
            );
        }

        if self.backends.is_empty() {
            issues.push("backends: at least one backend must be configured".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                issues.push("backends: backend name cannot be empty".to_string());
            } else if backend.name.contains('/') || backend.name.contains("..") {
                issues.push(format!(
                    "backends.{}: name must be usable as a path segment",
                    backend.name
                ));
            }
            if !seen.insert(backend.name.as_str()) {
                issues.push(format!("backends.{}: duplicate backend name", backend.name));
            }
            if backend.url.is_empty() {
                issues.push(format!("backends.{}: url cannot be empty", backend.name));
            } else if let Err(e) = reqwest::Url::parse(&backend.url) {
                issues.push(format!(
                    "backends.{}: invalid URL format: {}",
                    backend.name, e
                ));
            }
            if backend.token.is_empty() {
                issues.push(format!("backends.{}: token cannot be empty", backend.name));
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issues.push(format!(
                "logging.level: invalid log level '{}'. Valid levels: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(DavError::ValidationError(issues))
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub cache_root: Option<PathBuf>,
    pub log_level: Option<String>,
}
