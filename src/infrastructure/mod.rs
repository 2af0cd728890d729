//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, downloading, acquisition).
pub mod image;
/// Connectivity monitoring.
pub mod network;

pub use config::{AppConfig, CliArgs, LogLevel, StorageManager};
pub use image::{
    AcquireOutcome, CacheStats, DiskImageCache, FetcherConfig, HttpImageFetcher, ImageEvent,
    ImageEventKind, ImageLoader, ImageLoaderConfig, MemoryImageCache, TieredMemoryCache,
};
pub use network::{ConnectivityMonitor, HttpReachabilityProbe};
