//! In-memory image caches with a pluggable eviction policy.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::ImageTier;
use crate::domain::ports::ImageCachePort;

/// Default maximum number of images per tier.
pub const DEFAULT_CACHE_SIZE: usize = 200;

/// How a memory tier bounds its growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Never evicts; entries live until removed or cleared.
    Unbounded,
    /// Evicts the least recently used entry beyond `capacity`.
    Lru {
        /// Maximum number of entries.
        capacity: NonZeroUsize,
    },
}

impl EvictionPolicy {
    /// Maps a configured size to a policy, `0` meaning unbounded.
    #[must_use]
    pub fn from_size(size: usize) -> Self {
        NonZeroUsize::new(size).map_or(Self::Unbounded, |capacity| Self::Lru { capacity })
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::from_size(DEFAULT_CACHE_SIZE)
    }
}

/// Single-tier cache of decoded images keyed by URL.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<String, Arc<image::DynamicImage>>>,
    policy: EvictionPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the given eviction policy.
    #[must_use]
    pub fn new(policy: EvictionPolicy) -> Self {
        let cache = match policy {
            EvictionPolicy::Unbounded => LruCache::unbounded(),
            EvictionPolicy::Lru { capacity } => LruCache::new(capacity),
        };
        Self {
            cache: Mutex::new(cache),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(EvictionPolicy::default())
    }

    /// Returns the eviction policy in use.
    #[must_use]
    pub const fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        }
    }

    /// Peeks at an image without promoting it in the LRU order.
    pub fn peek(&self, url: &str) -> Option<Arc<image::DynamicImage>> {
        self.cache.lock().peek(url).cloned()
    }

    /// Returns true if `url` is cached, without touching statistics.
    pub fn contains(&self, url: &str) -> bool {
        self.cache.lock().contains(url)
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, url: &str) -> Option<Arc<image::DynamicImage>> {
        let mut cache = self.cache.lock();
        if let Some(img) = cache.get(url) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(url, "Memory cache hit");
            Some(img.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(url, "Memory cache miss");
            None
        }
    }

    fn put(&self, url: &str, image: Arc<image::DynamicImage>) {
        let mut cache = self.cache.lock();
        if let Some((evicted, _)) = cache.push(url.to_string(), image)
            && evicted != url
        {
            debug!(url = %evicted, "Evicted least recently used image");
        }
    }

    fn evict(&self, url: &str) {
        if self.cache.lock().pop(url).is_some() {
            debug!(url, "Evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }

    fn clear(&self) {
        self.cache.lock().clear();
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}

/// The two memory tiers, original and preview, managed together.
pub struct TieredMemoryCache {
    original: MemoryImageCache,
    preview: MemoryImageCache,
}

impl TieredMemoryCache {
    /// Creates both tiers with the same eviction policy.
    #[must_use]
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            original: MemoryImageCache::new(policy),
            preview: MemoryImageCache::new(policy),
        }
    }

    /// Returns the cache backing `tier`.
    #[must_use]
    pub const fn tier(&self, tier: ImageTier) -> &MemoryImageCache {
        match tier {
            ImageTier::Original => &self.original,
            ImageTier::Preview => &self.preview,
        }
    }

    /// Looks up `url` in `tier`.
    pub fn get(&self, tier: ImageTier, url: &str) -> Option<Arc<image::DynamicImage>> {
        self.tier(tier).get(url)
    }

    /// Stores `image` for `url` in `tier`.
    pub fn put(&self, tier: ImageTier, url: &str, image: Arc<image::DynamicImage>) {
        self.tier(tier).put(url, image);
    }

    /// Removes `url` from `tier`.
    pub fn remove(&self, tier: ImageTier, url: &str) {
        self.tier(tier).evict(url);
    }

    /// Empties `tier`.
    pub fn clear(&self, tier: ImageTier) {
        self.tier(tier).clear();
        debug!(%tier, "Cleared memory tier");
    }

    /// Returns both tiers for `url` if, and only if, both are cached.
    pub fn get_pair(
        &self,
        url: &str,
    ) -> Option<(Arc<image::DynamicImage>, Arc<image::DynamicImage>)> {
        let original = self.original.get(url)?;
        let preview = self.preview.get(url)?;
        Some((original, preview))
    }

    /// Removes `url` from both tiers.
    pub fn remove_both(&self, url: &str) {
        self.original.evict(url);
        self.preview.evict(url);
    }

    /// Empties both tiers.
    pub fn clear_all(&self) {
        self.original.clear();
        self.preview.clear();
        debug!("Cleared memory image caches");
    }

    /// Returns statistics for `tier`.
    #[must_use]
    pub fn stats(&self, tier: ImageTier) -> CacheStats {
        self.tier(tier).stats()
    }
}

impl Default for TieredMemoryCache {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(size: u32) -> Arc<image::DynamicImage> {
        Arc::new(image::DynamicImage::new_rgb8(size, size))
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryImageCache::new(EvictionPolicy::from_size(10));

        cache.put("https://a/1.png", image(100));
        let retrieved = cache.get("https://a/1.png");

        assert_eq!(retrieved.map(|img| img.width()), Some(100));
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryImageCache::default();
        assert!(cache.get("https://a/missing.png").is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = MemoryImageCache::new(EvictionPolicy::from_size(2));

        cache.put("one", image(10));
        cache.put("two", image(10));
        cache.put("three", image(10));

        assert!(cache.get("one").is_none());
        assert!(cache.get("two").is_some());
        assert!(cache.get("three").is_some());
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let cache = MemoryImageCache::new(EvictionPolicy::from_size(0));
        assert_eq!(cache.policy(), EvictionPolicy::Unbounded);

        for i in 0..500 {
            cache.put(&format!("url-{i}"), image(1));
        }

        assert_eq!(cache.len(), 500);
        assert!(cache.peek("url-0").is_some());
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::new(EvictionPolicy::from_size(10));
        cache.put("one", image(10));

        let _ = cache.get("one");
        let _ = cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(EvictionPolicy::from_size(2));

        cache.put("one", image(10));
        cache.put("two", image(10));
        let _ = cache.peek("one");
        cache.put("three", image(10));

        assert!(cache.peek("one").is_none());
    }

    #[test]
    fn test_tiers_are_independent() {
        let cache = TieredMemoryCache::new(EvictionPolicy::Unbounded);

        cache.put(ImageTier::Original, "u", image(100));
        assert!(cache.get_pair("u").is_none());

        cache.put(ImageTier::Preview, "u", image(10));
        let (original, preview) = cache.get_pair("u").unwrap();
        assert_eq!((original.width(), preview.width()), (100, 10));

        cache.remove(ImageTier::Preview, "u");
        assert!(cache.get(ImageTier::Original, "u").is_some());
        assert!(cache.get(ImageTier::Preview, "u").is_none());
    }

    #[test]
    fn test_remove_both_and_clear_all() {
        let cache = TieredMemoryCache::default();
        for url in ["a", "b"] {
            cache.put(ImageTier::Original, url, image(2));
            cache.put(ImageTier::Preview, url, image(1));
        }

        cache.remove_both("a");
        assert!(cache.get(ImageTier::Original, "a").is_none());
        assert!(cache.get(ImageTier::Preview, "a").is_none());
        assert!(cache.get_pair("b").is_some());

        cache.clear_all();
        assert!(cache.tier(ImageTier::Original).is_empty());
        assert!(cache.tier(ImageTier::Preview).is_empty());
    }
}
