//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with pluggable eviction
//! - Two-tier disk caching for persistence
//! - HTTP download and decoding
//! - The acquisition orchestrator tying them together

pub mod disk_cache;
pub mod fetcher;
pub mod loader;
pub mod memory_cache;

pub use disk_cache::{DiskImageCache, default_cache_dir};
pub use fetcher::{FetcherConfig, HttpImageFetcher, decode_image};
pub use loader::{AcquireOutcome, ImageEvent, ImageEventKind, ImageLoader, ImageLoaderConfig};
pub use memory_cache::{CacheStats, EvictionPolicy, MemoryImageCache, TieredMemoryCache};
