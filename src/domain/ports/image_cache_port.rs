//! Port definition for in-memory image caching.

use std::sync::Arc;

/// Port for a single in-memory image tier keyed by URL.
/// Implementations must be thread-safe.
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the cache.
    /// Returns None if not cached; a miss is never an error.
    fn get(&self, url: &str) -> Option<Arc<image::DynamicImage>>;

    /// Stores an image in the cache.
    fn put(&self, url: &str, image: Arc<image::DynamicImage>);

    /// Removes an image from the cache.
    fn evict(&self, url: &str);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    fn clear(&self);
}
