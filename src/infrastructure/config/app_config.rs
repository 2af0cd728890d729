//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::args::CliArgs;
use crate::infrastructure::image::disk_cache::default_cache_dir;
use crate::infrastructure::image::fetcher::FetcherConfig;
use crate::infrastructure::image::loader::ImageLoaderConfig;
use crate::infrastructure::image::memory_cache::DEFAULT_CACHE_SIZE;
use crate::infrastructure::network::reachability::DEFAULT_PROBE_URL;

const APP_NAME: &str = "picgrid";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "picgrid";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Connectivity monitoring configuration.
    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    /// Preview configuration.
    #[serde(default)]
    pub preview: PreviewConfig,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root. Defaults to the platform cache directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Images kept in memory per tier, `0` for unbounded.
    #[serde(default = "default_memory_cache_size")]
    pub memory_cache_size: usize,

    /// Disk budget in bytes, `0` for unbounded.
    #[serde(default)]
    pub disk_cache_size: u64,
}

impl CacheConfig {
    /// Returns the effective cache root.
    #[must_use]
    pub fn effective_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_cache_dir)
    }

    /// Returns the disk budget, `None` when unbounded.
    #[must_use]
    pub const fn disk_budget(&self) -> Option<u64> {
        match self.disk_cache_size {
            0 => None,
            size => Some(size),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            memory_cache_size: default_memory_cache_size(),
            disk_cache_size: 0,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum concurrent downloads.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Accept invalid TLS certificates and host names.
    #[serde(default)]
    pub trust_all_tls: bool,

    /// Custom user agent.
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            trust_all_tls: false,
            user_agent: None,
        }
    }
}

/// Connectivity monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// URL contacted by the reachability probe.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Seconds between probes.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Probe timeout in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl ConnectivityConfig {
    /// Returns the probe interval, never shorter than one second.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    /// Returns the probe timeout.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: default_probe_url(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Preview configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Preview width in pixels.
    #[serde(default = "default_preview_width")]
    pub width: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: default_preview_width(),
        }
    }
}

const fn default_memory_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_max_concurrent_downloads() -> usize {
    4
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.to_string()
}

const fn default_probe_interval_secs() -> u64 {
    15
}

const fn default_probe_timeout_secs() -> u64 {
    5
}

const fn default_preview_width() -> u32 {
    256
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.directory = Some(cache_dir.clone());
        }
        if let Some(memory_cache_size) = args.memory_cache_size {
            self.cache.memory_cache_size = memory_cache_size;
        }
        if let Some(disk_cache_size) = args.disk_cache_size {
            self.cache.disk_cache_size = disk_cache_size;
        }
        if let Some(max_concurrent_downloads) = args.max_concurrent_downloads {
            self.network.max_concurrent_downloads = max_concurrent_downloads;
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.network.timeout_secs = timeout_secs;
        }
        if let Some(trust_all_tls) = args.trust_all_tls {
            self.network.trust_all_tls = trust_all_tls;
        }
        if let Some(probe_url) = &args.probe_url {
            self.connectivity.probe_url = probe_url.clone();
        }
        if let Some(probe_interval_secs) = args.probe_interval_secs {
            self.connectivity.probe_interval_secs = probe_interval_secs;
        }
        if let Some(preview_width) = args.preview_width {
            self.preview.width = preview_width;
        }
    }

    /// Builds the HTTP fetcher configuration.
    #[must_use]
    pub fn fetcher_config(&self) -> FetcherConfig {
        let defaults = FetcherConfig::default();
        FetcherConfig {
            timeout: Duration::from_secs(self.network.timeout_secs),
            connect_timeout: Duration::from_secs(self.network.connect_timeout_secs),
            trust_all_tls: self.network.trust_all_tls,
            user_agent: self
                .network
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
        }
    }

    /// Builds the image loader configuration.
    #[must_use]
    pub const fn loader_config(&self) -> ImageLoaderConfig {
        ImageLoaderConfig {
            memory_cache_size: self.cache.memory_cache_size,
            max_concurrent_downloads: self.network.max_concurrent_downloads,
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("picgrid.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}
