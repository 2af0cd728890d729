//! Domain types for image acquisition.

use std::sync::Arc;

use url::Url;

use crate::domain::errors::ImageError;

/// Maximum length in bytes of a derived cache key.
pub const MAX_KEY_LEN: usize = 200;

/// Filesystem-safe cache identity derived from an image URL.
///
/// Built from the host, the non-empty path segments and the query string,
/// joined with `_`. The fragment never takes part, so URLs that only differ
/// there share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey(String);

impl ImageKey {
    /// Derives the key for an already validated URL.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let mut parts: Vec<String> = Vec::new();

        if let Some(host) = url.host_str() {
            parts.push(sanitize(host));
        }
        if let Some(segments) = url.path_segments() {
            parts.extend(segments.filter(|s| !s.is_empty()).map(sanitize));
        }
        if let Some(query) = url.query().filter(|q| !q.is_empty()) {
            parts.push(sanitize(query));
        }

        let joined = parts.join("_");
        if joined.len() <= MAX_KEY_LEN {
            return Self(joined);
        }

        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(joined.as_bytes());
        let suffix = hex::encode(&digest[..16]);
        let keep = MAX_KEY_LEN - suffix.len() - 1;
        Self(format!("{}_{suffix}", &joined[..keep]))
    }

    /// Parses and validates a raw URL, then derives its key.
    ///
    /// # Errors
    /// Returns [`ImageError::InvalidUrl`] if the URL is malformed.
    pub fn parse(raw: &str) -> Result<Self, ImageError> {
        parse_image_url(raw).map(|url| Self::from_url(&url))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Validates that `raw` is an absolute `http`/`https` URL with a host.
///
/// # Errors
/// Returns [`ImageError::InvalidUrl`] describing why the URL was rejected.
pub fn parse_image_url(raw: &str) -> Result<Url, ImageError> {
    let url = Url::parse(raw.trim()).map_err(|e| ImageError::invalid_url(raw, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ImageError::invalid_url(
            raw,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ImageError::invalid_url(raw, "missing host"));
    }

    Ok(url)
}

/// One of the two cached representations of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTier {
    /// The full-size decoded download.
    Original,
    /// The grid-width preview generated from the original.
    Preview,
}

impl ImageTier {
    /// Both tiers, original first.
    pub const ALL: [Self; 2] = [Self::Original, Self::Preview];

    /// Name of the on-disk directory holding this tier.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Preview => "preview",
        }
    }
}

impl std::fmt::Display for ImageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// User-facing failure attached to a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    /// Human readable description.
    pub message: String,
    /// Whether a retry affordance should be offered.
    pub retryable: bool,
}

impl ImageFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }
}

impl From<&ImageError> for ImageFailure {
    fn from(error: &ImageError) -> Self {
        Self::new(error.to_string(), error.is_retryable())
    }
}

impl std::fmt::Display for ImageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Status of a URL in the acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Not requested yet, or the last attempt was cancelled.
    #[default]
    Idle,
    /// Being downloaded, decoded or persisted.
    Loading,
    /// Both tiers are cached and available in memory.
    Loaded,
    /// The last attempt failed.
    Failed(ImageFailure),
}

impl LoadState {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    /// Returns true if the image is currently being loaded.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if loading failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true once an attempt has settled, successfully or not.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Loaded | Self::Failed(_))
    }

    /// Returns the failure if this state carries one.
    #[must_use]
    pub const fn failure(&self) -> Option<&ImageFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory cache.
    MemoryCache,
    /// Loaded from disk cache.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A fully acquired image with both tiers decoded.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key the image is stored under.
    pub key: ImageKey,
    /// Full-size image.
    pub original: Arc<image::DynamicImage>,
    /// Preview scaled to the grid width.
    pub preview: Arc<image::DynamicImage>,
    /// Tier the image was served from.
    pub source: ImageSource,
}
