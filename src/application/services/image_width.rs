//! Process-wide preview width, written once by layout measurement.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Shared handle to the preview target width.
///
/// The first non-zero width set wins; later writes are ignored. Clones share
/// the same value.
#[derive(Debug, Clone)]
pub struct ImageWidth {
    tx: Arc<watch::Sender<Option<u32>>>,
}

impl ImageWidth {
    /// Creates a handle with no width known yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Creates a handle with the width already set.
    #[must_use]
    pub fn with_width(width: u32) -> Self {
        let handle = Self::new();
        handle.set(width);
        handle
    }

    /// Records the measured width. Returns true if this call set it.
    pub fn set(&self, width: u32) -> bool {
        if width == 0 {
            return false;
        }
        let updated = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(width);
            true
        });
        if updated {
            debug!(width, "Preview width established");
        }
        updated
    }

    /// Returns the width if it has been measured.
    #[must_use]
    pub fn get(&self) -> Option<u32> {
        *self.tx.borrow()
    }

    /// Waits until the width is known.
    pub async fn wait(&self) -> Option<u32> {
        let mut rx = self.tx.subscribe();
        let width = rx.wait_for(Option::is_some).await.ok()?;
        *width
    }
}

impl Default for ImageWidth {
    fn default() -> Self {
        Self::new()
    }
}
