//! Port for downloading and decoding remote images.

use async_trait::async_trait;

use crate::domain::errors::ImageError;

/// Port for fetching an image over the network.
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Downloads `url` and decodes the body into a bitmap.
    ///
    /// Fails with [`ImageError::InvalidUrl`] for malformed URLs,
    /// [`ImageError::Http`] for non-2xx responses, [`ImageError::Transport`]
    /// for network failures and [`ImageError::Decode`] for corrupt payloads.
    async fn fetch(&self, url: &str) -> Result<image::DynamicImage, ImageError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::domain::entities::parse_image_url;

    /// Mock fetcher producing blank images and recording calls.
    pub struct MockImageFetcher {
        calls: Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
        failures: Mutex<HashMap<String, ImageError>>,
        delay: Duration,
        width: u32,
        height: u32,
    }

    impl MockImageFetcher {
        /// Creates a fetcher returning 40x30 images immediately.
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(HashMap::new()),
                total: AtomicUsize::new(0),
                failures: Mutex::new(HashMap::new()),
                delay: Duration::ZERO,
                width: 40,
                height: 30,
            }
        }

        /// Delays every fetch by `delay`.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Sets the size of produced images.
        pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
            self.width = width;
            self.height = height;
            self
        }

        /// Makes every fetch of `url` fail with `error`.
        pub fn fail_with(&self, url: &str, error: ImageError) {
            self.failures.lock().insert(url.to_string(), error);
        }

        /// Makes fetches of `url` succeed again.
        pub fn succeed(&self, url: &str) {
            self.failures.lock().remove(url);
        }

        /// Number of fetches issued for `url`.
        pub fn calls(&self, url: &str) -> usize {
            self.calls.lock().get(url).copied().unwrap_or(0)
        }

        /// Number of fetches issued overall.
        pub fn total_calls(&self) -> usize {
            self.total.load(Ordering::SeqCst)
        }
    }

    impl Default for MockImageFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ImageFetcherPort for MockImageFetcher {
        async fn fetch(&self, url: &str) -> Result<image::DynamicImage, ImageError> {
            *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
            self.total.fetch_add(1, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            parse_image_url(url)?;
            if let Some(error) = self.failures.lock().get(url).cloned() {
                return Err(error);
            }
            Ok(image::DynamicImage::new_rgb8(self.width, self.height))
        }
    }
}
