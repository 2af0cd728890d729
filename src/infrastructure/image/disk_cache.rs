//! Disk-based two-tier image cache for persistence across sessions.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::{ImageKey, ImageTier};
use crate::domain::errors::ImageError;

/// Disk cache storing an original and a preview PNG per key.
///
/// Both tier directories are created by [`DiskImageCache::new`]; there is
/// no way to obtain an instance whose directories were never initialized.
pub struct DiskImageCache {
    root: PathBuf,
    max_size: Option<u64>,
    current_size: AtomicU64,
    file_count: AtomicUsize,
    // Shared by pair writers, exclusive for eviction and sweeping.
    pairs: RwLock<()>,
}

impl DiskImageCache {
    /// Creates the cache under `root`, sweeping half-written entries.
    ///
    /// `max_size` of `None` disables size-based cleanup.
    ///
    /// # Errors
    /// Returns error if a tier directory cannot be created or read.
    pub async fn new(root: PathBuf, max_size: Option<u64>) -> Result<Self, ImageError> {
        for tier in ImageTier::ALL {
            let dir = root.join(tier.dir_name());
            fs::create_dir_all(&dir).await.map_err(|e| {
                ImageError::storage(format!("failed to create {}: {e}", dir.display()))
            })?;
        }

        let cache = Self {
            root,
            max_size,
            current_size: AtomicU64::new(0),
            file_count: AtomicUsize::new(0),
            pairs: RwLock::new(()),
        };

        let swept = cache.sweep_orphans().await?;
        if swept > 0 {
            debug!(swept, "Removed orphaned cache files");
        }

        let (total_size, count) = cache.scan().await?;
        cache.current_size.store(total_size, Ordering::Relaxed);
        cache.file_count.store(count, Ordering::Relaxed);

        cache.enforce_size_limit().await;

        Ok(cache)
    }

    /// Returns the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding `tier`.
    #[must_use]
    pub fn tier_dir(&self, tier: ImageTier) -> PathBuf {
        self.root.join(tier.dir_name())
    }

    /// Returns the path for a cached tier file.
    #[must_use]
    pub fn cache_path(&self, tier: ImageTier, key: &ImageKey) -> PathBuf {
        self.tier_dir(tier).join(key.as_str())
    }

    /// Returns true only if both tiers are present for `key`.
    pub async fn exists(&self, key: &ImageKey) -> bool {
        for tier in ImageTier::ALL {
            let present = fs::try_exists(self.cache_path(tier, key))
                .await
                .unwrap_or(false);
            if !present {
                trace!(key = %key, %tier, "Disk cache miss");
                return false;
            }
        }
        trace!(key = %key, "Disk cache hit");
        true
    }

    /// Writes the given tiers of one entry.
    ///
    /// Eviction waits until both writes are done, so it never splits a pair
    /// that is still being stored.
    ///
    /// # Errors
    /// Returns [`ImageError::Storage`] if encoding or writing fails.
    pub async fn store_pair(
        &self,
        key: &ImageKey,
        original: Option<Arc<image::DynamicImage>>,
        preview: Option<Arc<image::DynamicImage>>,
    ) -> Result<(), ImageError> {
        let _writing = self.pairs.read().await;
        if let Some(image) = original {
            self.write_tier(ImageTier::Original, key, image).await?;
        }
        if let Some(image) = preview {
            self.write_tier(ImageTier::Preview, key, image).await?;
        }
        Ok(())
    }

    /// Persists the original tier as PNG.
    ///
    /// # Errors
    /// Returns [`ImageError::Storage`] if encoding or writing fails.
    pub async fn write_original(
        &self,
        key: &ImageKey,
        image: Arc<image::DynamicImage>,
    ) -> Result<(), ImageError> {
        self.write_tier(ImageTier::Original, key, image).await
    }

    /// Persists the preview tier as PNG.
    ///
    /// # Errors
    /// Returns [`ImageError::Storage`] if encoding or writing fails.
    pub async fn write_preview(
        &self,
        key: &ImageKey,
        image: Arc<image::DynamicImage>,
    ) -> Result<(), ImageError> {
        self.write_tier(ImageTier::Preview, key, image).await
    }

    /// Reads and decodes the original tier.
    ///
    /// # Errors
    /// Returns [`ImageError::Storage`] if the file is missing or unreadable.
    pub async fn read_original(&self, key: &ImageKey) -> Result<image::DynamicImage, ImageError> {
        self.read_tier(ImageTier::Original, key).await
    }

    /// Reads and decodes the preview tier. Any failure is a miss.
    pub async fn read_preview(&self, key: &ImageKey) -> Option<image::DynamicImage> {
        match self.read_tier(ImageTier::Preview, key).await {
            Ok(img) => Some(img),
            Err(e) => {
                debug!(key = %key, error = %e, "Preview unreadable, treating as miss");
                None
            }
        }
    }

    /// Removes both tiers for `key`. Missing files are ignored.
    pub async fn remove(&self, key: &ImageKey) {
        for tier in ImageTier::ALL {
            self.remove_file(&self.cache_path(tier, key)).await;
        }
        debug!(key = %key, "Removed entry from disk cache");
    }

    /// Clears both tier directories.
    ///
    /// # Errors
    /// Returns error if a cache directory cannot be read.
    pub async fn clear(&self) -> Result<(), ImageError> {
        for tier in ImageTier::ALL {
            for path in self.list_files(tier).await? {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                }
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.file_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Deletes files that exist in only one tier. Returns how many were removed.
    ///
    /// A crash between the two tier writes leaves such a half entry behind;
    /// [`exists`](Self::exists) already treats it as absent. Waits for pairs
    /// being written through [`store_pair`](Self::store_pair).
    ///
    /// # Errors
    /// Returns error if a cache directory cannot be read.
    pub async fn sweep_orphans(&self) -> Result<usize, ImageError> {
        let _sweeping = self.pairs.write().await;
        let mut removed = 0;
        for (tier, other) in [
            (ImageTier::Original, ImageTier::Preview),
            (ImageTier::Preview, ImageTier::Original),
        ] {
            let other_dir = self.tier_dir(other);
            for path in self.list_files(tier).await? {
                let Some(name) = path.file_name() else {
                    continue;
                };
                if fs::try_exists(other_dir.join(name)).await.unwrap_or(true) {
                    continue;
                }
                let size = fs::metadata(&path).await.map(|m| m.len()).ok();
                if fs::remove_file(&path).await.is_ok() {
                    if let Some(size) = size {
                        saturating_sub(&self.current_size, size);
                        saturating_sub_count(&self.file_count, 1);
                    }
                    trace!(path = %path.display(), "Removed orphaned cache file");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Returns the current cache size in bytes across both tiers.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached files across both tiers.
    #[must_use]
    pub fn files(&self) -> usize {
        self.file_count.load(Ordering::Relaxed)
    }

    async fn write_tier(
        &self,
        tier: ImageTier,
        key: &ImageKey,
        image: Arc<image::DynamicImage>,
    ) -> Result<(), ImageError> {
        let bytes = tokio::task::spawn_blocking(move || encode_png(&image))
            .await
            .map_err(|e| ImageError::storage(format!("encode task failed: {e}")))??;

        let path = self.cache_path(tier, key);
        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| ImageError::storage(format!("failed to create cache file: {e}")))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| ImageError::storage(format!("failed to write cache file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| ImageError::storage(format!("failed to flush cache file: {e}")))?;

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            saturating_sub(&self.current_size, old);
        } else {
            self.file_count.fetch_add(1, Ordering::Relaxed);
        }
        self.current_size.fetch_add(new_size, Ordering::Relaxed);

        debug!(key = %key, %tier, size = new_size, "Stored image in disk cache");
        Ok(())
    }

    async fn read_tier(
        &self,
        tier: ImageTier,
        key: &ImageKey,
    ) -> Result<image::DynamicImage, ImageError> {
        let path = self.cache_path(tier, key);
        let bytes = fs::read(&path).await.map_err(|e| {
            ImageError::storage(format!("failed to read {}: {e}", path.display()))
        })?;

        let result = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await;
        match result {
            Ok(Ok(img)) => {
                trace!(key = %key, %tier, "Decoded image from disk cache");
                Ok(img)
            }
            Ok(Err(e)) => {
                warn!(key = %key, %tier, error = %e, "Failed to decode cached image");
                Err(ImageError::storage(format!("corrupt cache file: {e}")))
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                Err(ImageError::storage(format!("decode task failed: {e}")))
            }
        }
    }

    async fn remove_file(&self, path: &Path) {
        let size = fs::metadata(path).await.map(|m| m.len()).ok();
        match fs::remove_file(path).await {
            Ok(()) => {
                if let Some(s) = size {
                    saturating_sub(&self.current_size, s);
                    saturating_sub_count(&self.file_count, 1);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
        }
    }

    async fn list_files(&self, tier: ImageTier) -> Result<Vec<PathBuf>, ImageError> {
        let dir = self.tier_dir(tier);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| ImageError::storage(format!("failed to read {}: {e}", dir.display())))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ImageError::storage(format!("failed to read entry: {e}")))?
        {
            if entry.file_type().await.is_ok_and(|t| t.is_file()) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    async fn scan(&self) -> Result<(u64, usize), ImageError> {
        let mut total_size = 0u64;
        let mut count = 0usize;
        for tier in ImageTier::ALL {
            for path in self.list_files(tier).await? {
                if let Ok(meta) = fs::metadata(&path).await {
                    total_size += meta.len();
                    count += 1;
                }
            }
        }
        Ok((total_size, count))
    }

    /// Removes least recently accessed entries while over the size budget.
    ///
    /// Entries are removed as pairs so `exists` never sees half an entry.
    /// Runs only while no [`store_pair`](Self::store_pair) is in progress.
    pub async fn enforce_size_limit(&self) {
        let Some(max_size) = self.max_size else {
            return;
        };
        let _evicting = self.pairs.write().await;
        let current_size = self.current_size();
        if current_size <= max_size {
            return;
        }

        debug!(current_size, max_size, "Disk cache over limit, cleaning up");

        let Ok(originals) = self.list_files(ImageTier::Original).await else {
            return;
        };

        let mut entries: Vec<(PathBuf, SystemTime)> = Vec::new();
        for path in originals {
            if let Ok(meta) = fs::metadata(&path).await {
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                entries.push((path, accessed));
            }
        }
        entries.sort_by_key(|(_, time)| *time);

        let target = max_size - max_size / 10;
        let mut freed_count = 0usize;
        for (path, _) in entries {
            if self.current_size() <= target {
                break;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            self.remove_file(&path).await;
            self.remove_file(&self.tier_dir(ImageTier::Preview).join(name))
                .await;
            freed_count += 1;
        }

        debug!(
            freed_count,
            current_size = self.current_size(),
            "Disk cache cleanup complete"
        );
    }
}

fn encode_png(image: &image::DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    let result = image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png);
    match result {
        Ok(()) => Ok(bytes),
        Err(image::ImageError::Unsupported(_)) => {
            bytes.clear();
            image::DynamicImage::ImageRgba8(image.to_rgba8())
                .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                .map_err(|e| ImageError::storage(format!("failed to encode PNG: {e}")))?;
            Ok(bytes)
        }
        Err(e) => Err(ImageError::storage(format!("failed to encode PNG: {e}"))),
    }
}

fn saturating_sub(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(amount))
    });
}

fn saturating_sub_count(counter: &AtomicUsize, amount: usize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(amount))
    });
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "picgrid", "picgrid").map_or_else(
        || {
            std::env::temp_dir()
                .join("picgrid")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}
