//! Command-line arguments.

use super::app_config::LogLevel;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Default, Parser)]
#[command(
    name = "picgrid",
    version,
    about = "Download, cache and preview images for an image grid",
    long_about = None
)]
pub struct CliArgs {
    /// Image URLs to load.
    #[arg(value_name = "URLS")]
    pub urls: Vec<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Image cache directory.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Images kept in memory per tier (0 for unbounded).
    #[arg(long)]
    pub memory_cache_size: Option<usize>,

    /// Disk cache budget in bytes (0 for unbounded).
    #[arg(long)]
    pub disk_cache_size: Option<u64>,

    /// Maximum concurrent downloads.
    #[arg(long)]
    pub max_concurrent_downloads: Option<usize>,

    /// Request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Accept invalid TLS certificates.
    #[arg(long)]
    pub trust_all_tls: Option<bool>,

    /// URL probed to detect connectivity.
    #[arg(long, value_name = "URL")]
    pub probe_url: Option<String>,

    /// Seconds between connectivity probes.
    #[arg(long)]
    pub probe_interval_secs: Option<u64>,

    /// Preview width in pixels.
    #[arg(short = 'w', long)]
    pub preview_width: Option<u32>,

    /// Keep running and retry failed images when connectivity returns.
    #[arg(long)]
    pub watch: bool,

    /// Empty the memory and disk caches before loading.
    #[arg(long)]
    pub clear_cache: bool,
}
