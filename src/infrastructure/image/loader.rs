//! Async image acquisition orchestrator.
//!
//! Resolves a URL through three tiers: Memory -> Disk -> Network. Concurrent
//! requests for the same cache key share one in-flight acquisition, and
//! retryable failures are acquired again when connectivity comes back.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, SemaphorePermit, broadcast, mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace, warn};

use crate::application::services::{ImageWidth, generate_preview};
use crate::domain::connection::ConnectivityEvent;
use crate::domain::entities::{
    ImageFailure, ImageKey, ImageSource, ImageTier, LoadState, LoadedImage, parse_image_url,
};
use crate::domain::errors::{ImageError, TransportKind};
use crate::domain::ports::ImageFetcherPort;
use crate::infrastructure::network::ConnectivityMonitor;

use super::disk_cache::DiskImageCache;
use super::memory_cache::{CacheStats, DEFAULT_CACHE_SIZE, EvictionPolicy, TieredMemoryCache};

/// Notification sent to the UI layer when a URL changes state.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEvent {
    /// The URL that changed.
    pub url: String,
    /// What happened to it.
    pub kind: ImageEventKind,
}

/// Kind of [`ImageEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum ImageEventKind {
    /// A network acquisition started.
    Loading,
    /// Both tiers are available in memory.
    Loaded {
        /// Tier the image was served from.
        source: ImageSource,
    },
    /// The acquisition failed.
    ///
    /// Not sent while the connectivity monitor reports offline. The state
    /// still becomes [`LoadState::Failed`], so [`ImageLoader::subscribe`]
    /// observers see failures that this channel suppresses.
    Failed(ImageFailure),
}

/// Terminal result of one acquisition, shared by every caller that joined it.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// The image is available.
    Loaded(LoadedImage),
    /// The acquisition failed.
    Failed(ImageFailure),
    /// The acquisition was cancelled before it committed.
    Cancelled,
}

impl AcquireOutcome {
    /// Returns the loaded image, if any.
    #[must_use]
    pub const fn loaded(&self) -> Option<&LoadedImage> {
        match self {
            Self::Loaded(image) => Some(image),
            _ => None,
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&ImageFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Configuration for the image loader.
#[derive(Debug, Clone)]
pub struct ImageLoaderConfig {
    /// Maximum images per memory tier, `0` for unbounded.
    pub memory_cache_size: usize,
    /// Maximum concurrent downloads and preview encodes.
    pub max_concurrent_downloads: usize,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: DEFAULT_CACHE_SIZE,
            max_concurrent_downloads: 4,
        }
    }
}

type SharedOutcome = Shared<BoxFuture<'static, AcquireOutcome>>;

/// Serializes the commit phase of a flight against cancellation.
#[derive(Debug, Default)]
struct FlightGate {
    cancelled: bool,
}

/// One in-flight acquisition for a cache key.
struct Flight {
    generation: u64,
    urls: HashSet<String>,
    /// Set once the network path was taken.
    loading: bool,
    gate: Arc<AsyncMutex<FlightGate>>,
    abort: AbortHandle,
    outcome: SharedOutcome,
}

#[derive(Default)]
struct StateTable(HashMap<String, watch::Sender<LoadState>>);

impl StateTable {
    fn get(&self, url: &str) -> LoadState {
        self.0
            .get(url)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Returns true if the state changed.
    fn set(&mut self, url: &str, state: LoadState) -> bool {
        let tx = self
            .0
            .entry(url.to_string())
            .or_insert_with(|| watch::channel(LoadState::Idle).0);
        tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        })
    }

    fn subscribe(&mut self, url: &str) -> watch::Receiver<LoadState> {
        self.0
            .entry(url.to_string())
            .or_insert_with(|| watch::channel(LoadState::Idle).0)
            .subscribe()
    }

    fn urls_where(&self, predicate: impl Fn(&LoadState) -> bool) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, tx)| predicate(&*tx.borrow()))
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[derive(Default)]
struct Registry {
    states: StateTable,
    in_flight: HashMap<ImageKey, Flight>,
    next_generation: u64,
}

/// Both tiers of an entry, ready to be persisted and cached.
struct Staged {
    original: Arc<image::DynamicImage>,
    preview: Arc<image::DynamicImage>,
    source: ImageSource,
    write_original: bool,
    write_preview: bool,
}

struct LoaderInner {
    config: ImageLoaderConfig,
    memory: TieredMemoryCache,
    disk: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    connectivity: Arc<ConnectivityMonitor>,
    image_width: ImageWidth,
    semaphore: Semaphore,
    /// Never held across an `.await`.
    registry: Mutex<Registry>,
    event_tx: mpsc::UnboundedSender<ImageEvent>,
    recovery: Mutex<Option<AbortHandle>>,
}

/// Orchestrates image acquisition from memory, disk, and network.
///
/// Cheap to clone; clones share caches, state and in-flight requests.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader and spawns its connectivity recovery task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        config: ImageLoaderConfig,
        fetcher: Arc<dyn ImageFetcherPort>,
        disk_cache: Arc<DiskImageCache>,
        connectivity: Arc<ConnectivityMonitor>,
        image_width: ImageWidth,
        event_tx: &mpsc::UnboundedSender<ImageEvent>,
    ) -> Self {
        let connectivity_rx = connectivity.subscribe();

        let inner = Arc::new(LoaderInner {
            memory: TieredMemoryCache::new(EvictionPolicy::from_size(config.memory_cache_size)),
            semaphore: Semaphore::new(config.max_concurrent_downloads.max(1)),
            config,
            disk: disk_cache,
            fetcher,
            connectivity,
            image_width,
            registry: Mutex::new(Registry::default()),
            event_tx: event_tx.clone(),
            recovery: Mutex::new(None),
        });

        let recovery = tokio::spawn(run_recovery_loop(Arc::downgrade(&inner), connectivity_rx));
        *inner.recovery.lock() = Some(recovery.abort_handle());

        Self { inner }
    }

    /// Acquires `url`, waiting for the result.
    ///
    /// A URL whose last attempt failed reports that failure without a new
    /// network attempt, unless its key has since reached the disk cache or
    /// is being acquired for another URL. Use [`retry`](Self::retry) to force
    /// a new attempt.
    pub async fn acquire(&self, url: &str) -> AcquireOutcome {
        self.acquire_with(url, false).await
    }

    /// Acquires `url` again, even if its last attempt failed.
    pub async fn retry(&self, url: &str) -> AcquireOutcome {
        self.acquire_with(url, true).await
    }

    /// Starts acquiring `url` in the background.
    pub fn request_load(&self, url: &str) {
        let loader = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            loader.acquire(&url).await;
        });
    }

    /// Starts a forced re-acquisition of `url` in the background.
    pub fn request_retry(&self, url: &str) {
        let loader = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            loader.retry(&url).await;
        });
    }

    async fn acquire_with(&self, url: &str, force: bool) -> AcquireOutcome {
        let key = match parse_image_url(url) {
            Ok(parsed) => ImageKey::from_url(&parsed),
            Err(e) => {
                warn!(url, error = %e, "Rejected image URL");
                let failure = ImageFailure::from(&e);
                self.inner.registry.lock().states.set(url, LoadState::Failed(failure.clone()));
                self.inner.emit(url, ImageEventKind::Failed(failure.clone()));
                return AcquireOutcome::Failed(failure);
            }
        };

        if let Some((original, preview)) = self.inner.memory.get_pair(url) {
            trace!(url, "Serving image from memory");
            let changed = self.inner.registry.lock().states.set(url, LoadState::Loaded);
            if changed {
                self.inner.emit(
                    url,
                    ImageEventKind::Loaded {
                        source: ImageSource::MemoryCache,
                    },
                );
            }
            return AcquireOutcome::Loaded(LoadedImage {
                key,
                original,
                preview,
                source: ImageSource::MemoryCache,
            });
        }

        // A stored failure yields to an entry another URL has since cached.
        let failed = !force && self.inner.registry.lock().states.get(url).is_failed();
        let on_disk = failed && self.inner.disk.exists(&key).await;

        let outcome = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;

            if !force
                && !on_disk
                && !registry.in_flight.contains_key(&key)
                && let LoadState::Failed(failure) = registry.states.get(url)
            {
                return AcquireOutcome::Failed(failure);
            }

            if let Some(flight) = registry.in_flight.get_mut(&key) {
                trace!(url, key = %key, "Joining in-flight acquisition");
                flight.urls.insert(url.to_string());
                if flight.loading && registry.states.set(url, LoadState::Loading) {
                    self.inner.emit(url, ImageEventKind::Loading);
                }
                flight.outcome.clone()
            } else {
                start_flight(&self.inner, registry, key, url)
            }
        };

        outcome.await
    }

    /// Cancels the acquisition `url` takes part in.
    ///
    /// When other URLs share the acquisition only `url` is detached from it.
    /// Otherwise the task is aborted: nothing is written to the caches and no
    /// `Loaded` or `Failed` event follows. Returns false if `url` was not
    /// being acquired or the acquisition already committed.
    pub async fn cancel(&self, url: &str) -> bool {
        let Ok(parsed) = parse_image_url(url) else {
            return false;
        };
        let key = ImageKey::from_url(&parsed);

        let (generation, gate) = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;
            let Some(flight) = registry.in_flight.get_mut(&key) else {
                return false;
            };
            if !flight.urls.contains(url) {
                return false;
            }
            if flight.urls.len() > 1 {
                flight.urls.remove(url);
                registry.states.set(url, LoadState::Idle);
                debug!(url, key = %key, "Detached from shared acquisition");
                return true;
            }
            (flight.generation, flight.gate.clone())
        };

        self.inner.cancel_flight(&key, generation, &gate).await
    }

    /// Cancels every in-flight acquisition.
    pub async fn cancel_all(&self) {
        let flights: Vec<(ImageKey, u64, Arc<AsyncMutex<FlightGate>>)> = self
            .inner
            .registry
            .lock()
            .in_flight
            .iter()
            .map(|(key, flight)| (key.clone(), flight.generation, flight.gate.clone()))
            .collect();

        let mut cancelled = 0usize;
        for (key, generation, gate) in flights {
            if self.inner.cancel_flight(&key, generation, &gate).await {
                cancelled += 1;
            }
        }
        debug!(cancelled, "Cancelled all image acquisitions");
    }

    /// Returns the current state of `url`.
    #[must_use]
    pub fn state(&self, url: &str) -> LoadState {
        self.inner.registry.lock().states.get(url)
    }

    /// Watches the state of `url`.
    ///
    /// Unlike the event channel, the watched state reports failures
    /// regardless of connectivity.
    #[must_use]
    pub fn subscribe(&self, url: &str) -> watch::Receiver<LoadState> {
        self.inner.registry.lock().states.subscribe(url)
    }

    /// Returns the cached full-size image. Never fetches.
    #[must_use]
    pub fn original(&self, url: &str) -> Option<Arc<image::DynamicImage>> {
        self.inner.memory.get(ImageTier::Original, url)
    }

    /// Returns the cached preview. Never fetches.
    #[must_use]
    pub fn preview(&self, url: &str) -> Option<Arc<image::DynamicImage>> {
        self.inner.memory.get(ImageTier::Preview, url)
    }

    /// Lists URLs whose last attempt failed with a retryable error.
    #[must_use]
    pub fn retryable_failures(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .states
            .urls_where(|state| state.failure().is_some_and(|f| f.retryable))
    }

    /// Returns true if `url` is being fetched from the network.
    #[must_use]
    pub fn is_loading(&self, url: &str) -> bool {
        self.state(url).is_loading()
    }

    /// Number of in-flight acquisitions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.registry.lock().in_flight.len()
    }

    /// Returns memory cache statistics for `tier`.
    #[must_use]
    pub fn memory_cache_stats(&self, tier: ImageTier) -> CacheStats {
        self.inner.memory.stats(tier)
    }

    /// Empties both memory tiers and the disk cache.
    ///
    /// Loaded URLs return to `Idle`. In-flight acquisitions are not affected.
    ///
    /// # Errors
    /// Returns error if the disk cache cannot be cleared.
    pub async fn clear_all(&self) -> Result<(), ImageError> {
        self.inner.memory.clear_all();
        self.inner.disk.clear().await?;

        let mut registry = self.inner.registry.lock();
        for url in registry.states.urls_where(LoadState::is_loaded) {
            registry.states.set(&url, LoadState::Idle);
        }
        info!("Cleared image caches");
        Ok(())
    }

    /// Stops connectivity recovery and cancels every acquisition.
    pub async fn shutdown(&self) {
        if let Some(recovery) = self.inner.recovery.lock().take() {
            recovery.abort();
        }
        self.cancel_all().await;
        debug!("Image loader shut down");
    }
}

/// Registers a new flight for `key` and spawns its task.
///
/// Runs under the registry lock, so the task cannot observe the table
/// before its own entry is inserted.
fn start_flight(
    inner: &Arc<LoaderInner>,
    registry: &mut Registry,
    key: ImageKey,
    url: &str,
) -> SharedOutcome {
    registry.next_generation += 1;
    let generation = registry.next_generation;
    let gate = Arc::new(AsyncMutex::new(FlightGate::default()));

    let task = tokio::spawn(run_flight(
        inner.clone(),
        key.clone(),
        url.to_string(),
        generation,
        gate.clone(),
    ));
    let abort = task.abort_handle();

    let weak = Arc::downgrade(inner);
    let flight_key = key.clone();
    let outcome = async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => AcquireOutcome::Cancelled,
            Err(e) => {
                error!(key = %flight_key, error = %e, "Image acquisition task panicked");
                let failure = ImageFailure::new(format!("acquisition failed: {e}"), false);
                if let Some(inner) = weak.upgrade() {
                    inner.abandon_flight(&flight_key, generation, &failure);
                }
                AcquireOutcome::Failed(failure)
            }
        }
    }
    .boxed()
    .shared();

    debug!(url, key = %key, generation, "Starting image acquisition");
    registry.in_flight.insert(
        key,
        Flight {
            generation,
            urls: HashSet::from([url.to_string()]),
            loading: false,
            gate,
            abort,
            outcome: outcome.clone(),
        },
    );
    outcome
}

async fn run_flight(
    inner: Arc<LoaderInner>,
    key: ImageKey,
    url: String,
    generation: u64,
    gate: Arc<AsyncMutex<FlightGate>>,
) -> AcquireOutcome {
    let staged = inner.stage(&key, &url, generation).await;

    let gate = gate.lock().await;
    if gate.cancelled {
        return AcquireOutcome::Cancelled;
    }

    let result = match staged {
        Ok(staged) => inner.persist(&key, staged).await,
        Err(e) => Err(e),
    };
    inner.complete(&key, generation, result)
}

async fn run_recovery_loop(
    weak: Weak<LoaderInner>,
    mut events: broadcast::Receiver<ConnectivityEvent>,
) {
    loop {
        let restored = match events.recv().await {
            Ok(event) => event == ConnectivityEvent::Restored,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connectivity events lagged");
                true
            }
            Err(RecvError::Closed) => break,
        };
        if !restored {
            continue;
        }

        let Some(inner) = weak.upgrade() else {
            break;
        };
        if !inner.connectivity.is_online() {
            continue;
        }

        let loader = ImageLoader { inner };
        let urls = loader.retryable_failures();
        if !urls.is_empty() {
            info!(count = urls.len(), "Connectivity restored, retrying failed images");
        }
        for url in urls {
            loader.request_retry(&url);
        }
    }

    debug!("Image recovery loop stopped");
}

impl LoaderInner {
    fn emit(&self, url: &str, kind: ImageEventKind) {
        let event = ImageEvent {
            url: url.to_string(),
            kind,
        };
        if self.event_tx.send(event).is_err() {
            trace!(url, "Image event receiver dropped");
        }
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, ImageError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| ImageError::transport(TransportKind::Other, "download slots closed"))
    }

    /// Resolves both tiers from disk, or from the network on a miss.
    async fn stage(
        &self,
        key: &ImageKey,
        url: &str,
        generation: u64,
    ) -> Result<Staged, ImageError> {
        if self.disk.exists(key).await {
            let original = match self.disk.read_original(key).await {
                Ok(img) => Arc::new(img),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached original unreadable, purging entry");
                    self.disk.remove(key).await;
                    return Err(e);
                }
            };

            if let Some(preview) = self.disk.read_preview(key).await {
                return Ok(Staged {
                    original,
                    preview: Arc::new(preview),
                    source: ImageSource::DiskCache,
                    write_original: false,
                    write_preview: false,
                });
            }

            debug!(key = %key, "Regenerating unreadable preview");
            let preview = self.render_preview(original.clone()).await?;
            return Ok(Staged {
                original,
                preview,
                source: ImageSource::DiskCache,
                write_original: false,
                write_preview: true,
            });
        }

        self.mark_loading(key, generation);

        let original = {
            let _permit = self.permit().await?;
            Arc::new(self.fetcher.fetch(url).await?)
        };
        let preview = self.render_preview(original.clone()).await?;

        Ok(Staged {
            original,
            preview,
            source: ImageSource::Network,
            write_original: true,
            write_preview: true,
        })
    }

    /// Waits for the preview width, then rescales off the async threads.
    async fn render_preview(
        &self,
        original: Arc<image::DynamicImage>,
    ) -> Result<Arc<image::DynamicImage>, ImageError> {
        let width = self
            .image_width
            .wait()
            .await
            .ok_or_else(|| ImageError::storage("preview width unavailable"))?;

        let _permit = self.permit().await?;
        tokio::task::spawn_blocking(move || generate_preview(&original, width))
            .await
            .map_err(|e| ImageError::decode(format!("preview task failed: {e}")))?
            .map(Arc::new)
    }

    /// Writes the tiers that are not on disk yet. Purges the entry on failure.
    async fn persist(&self, key: &ImageKey, staged: Staged) -> Result<Staged, ImageError> {
        let written = self
            .disk
            .store_pair(
                key,
                staged.write_original.then(|| staged.original.clone()),
                staged.write_preview.then(|| staged.preview.clone()),
            )
            .await;

        if let Err(e) = written {
            warn!(key = %key, error = %e, "Failed to persist image, purging entry");
            self.disk.remove(key).await;
            return Err(e);
        }

        if staged.write_original || staged.write_preview {
            self.disk.enforce_size_limit().await;
        }
        Ok(staged)
    }

    fn mark_loading(&self, key: &ImageKey, generation: u64) {
        let mut guard = self.registry.lock();
        let registry = &mut *guard;
        let Some(flight) = registry.in_flight.get_mut(key) else {
            return;
        };
        if flight.generation != generation {
            return;
        }

        flight.loading = true;
        for url in &flight.urls {
            if registry.states.set(url, LoadState::Loading) {
                self.emit(url, ImageEventKind::Loading);
            }
        }
    }

    /// Publishes the result to every attached URL and retires the flight.
    fn complete(
        &self,
        key: &ImageKey,
        generation: u64,
        result: Result<Staged, ImageError>,
    ) -> AcquireOutcome {
        let mut guard = self.registry.lock();
        let registry = &mut *guard;

        let current = registry
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.generation == generation);
        if !current {
            return AcquireOutcome::Cancelled;
        }
        let Some(flight) = registry.in_flight.remove(key) else {
            return AcquireOutcome::Cancelled;
        };

        match result {
            Ok(staged) => {
                for url in &flight.urls {
                    self.memory
                        .put(ImageTier::Original, url, staged.original.clone());
                    self.memory
                        .put(ImageTier::Preview, url, staged.preview.clone());
                    registry.states.set(url, LoadState::Loaded);
                    self.emit(
                        url,
                        ImageEventKind::Loaded {
                            source: staged.source,
                        },
                    );
                }
                debug!(key = %key, source = %staged.source, "Image loaded");

                AcquireOutcome::Loaded(LoadedImage {
                    key: key.clone(),
                    original: staged.original,
                    preview: staged.preview,
                    source: staged.source,
                })
            }
            Err(e) => {
                let failure = ImageFailure::from(&e);
                let online = self.connectivity.is_online();
                warn!(
                    key = %key,
                    error = %e,
                    retryable = failure.retryable,
                    online,
                    "Image acquisition failed"
                );

                for url in &flight.urls {
                    registry.states.set(url, LoadState::Failed(failure.clone()));
                    if online {
                        self.emit(url, ImageEventKind::Failed(failure.clone()));
                    }
                }

                AcquireOutcome::Failed(failure)
            }
        }
    }

    /// Aborts a flight unless it already committed or was superseded.
    async fn cancel_flight(
        &self,
        key: &ImageKey,
        generation: u64,
        gate: &AsyncMutex<FlightGate>,
    ) -> bool {
        let mut gate = gate.lock().await;

        let mut guard = self.registry.lock();
        let registry = &mut *guard;
        let current = registry
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.generation == generation);
        if !current {
            return false;
        }
        let Some(flight) = registry.in_flight.remove(key) else {
            return false;
        };

        gate.cancelled = true;
        flight.abort.abort();
        for url in &flight.urls {
            registry.states.set(url, LoadState::Idle);
        }
        debug!(key = %key, generation, "Cancelled image acquisition");
        true
    }

    /// Marks a flight whose task died as failed.
    fn abandon_flight(&self, key: &ImageKey, generation: u64, failure: &ImageFailure) {
        let mut guard = self.registry.lock();
        let registry = &mut *guard;
        let current = registry
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.generation == generation);
        if !current {
            return;
        }
        if let Some(flight) = registry.in_flight.remove(key) {
            for url in &flight.urls {
                registry.states.set(url, LoadState::Failed(failure.clone()));
                self.emit(url, ImageEventKind::Failed(failure.clone()));
            }
        }
    }
}

impl Drop for LoaderInner {
    fn drop(&mut self) {
        if let Some(recovery) = self.recovery.get_mut().take() {
            recovery.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::future::join_all;
    use tempfile::TempDir;

    use crate::domain::ports::ReachabilityProbe;
    use crate::domain::ports::mocks::{MockImageFetcher, MockReachabilityProbe};

    const URL: &str = "https://images.example.com/photos/cat.png";
    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        loader: ImageLoader,
        fetcher: Arc<MockImageFetcher>,
        disk: Arc<DiskImageCache>,
        monitor: Arc<ConnectivityMonitor>,
        events: mpsc::UnboundedReceiver<ImageEvent>,
        _dir: TempDir,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<ImageEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        async fn wait_for(&self, url: &str, predicate: impl Fn(&LoadState) -> bool) {
            let mut rx = self.loader.subscribe(url);
            tokio::time::timeout(WAIT, rx.wait_for(|state| predicate(state)))
                .await
                .expect("state not reached in time")
                .unwrap();
        }
    }

    async fn harness_with(fetcher: MockImageFetcher, width: ImageWidth) -> Harness {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(
            DiskImageCache::new(dir.path().join("images"), None)
                .await
                .unwrap(),
        );
        let mut probe = MockReachabilityProbe::new();
        probe.expect_probe().never();
        let probe: Arc<dyn ReachabilityProbe> = Arc::new(probe);
        let monitor = Arc::new(ConnectivityMonitor::new(probe, Duration::from_secs(60)));

        let fetcher = Arc::new(fetcher);
        let (event_tx, events) = mpsc::unbounded_channel();
        let loader = ImageLoader::new(
            ImageLoaderConfig::default(),
            fetcher.clone(),
            disk.clone(),
            monitor.clone(),
            width,
            &event_tx,
        );

        Harness {
            loader,
            fetcher,
            disk,
            monitor,
            events,
            _dir: dir,
        }
    }

    async fn harness() -> Harness {
        harness_with(MockImageFetcher::new(), ImageWidth::with_width(20)).await
    }

    fn key(url: &str) -> ImageKey {
        ImageKey::parse(url).unwrap()
    }

    fn kinds(events: &[ImageEvent]) -> Vec<ImageEventKind> {
        events.iter().map(|event| event.kind.clone()).collect()
    }

    #[tokio::test]
    async fn test_fresh_url_loads_from_network() {
        let mut h = harness().await;

        let outcome = h.loader.acquire(URL).await;

        let loaded = outcome.loaded().expect("image should load");
        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(h.loader.state(URL), LoadState::Loaded);
        assert!(h.disk.exists(&key(URL)).await);
        assert!(h.loader.original(URL).is_some());
        assert!(h.loader.preview(URL).is_some());
        assert_eq!(
            kinds(&h.drain()),
            vec![
                ImageEventKind::Loading,
                ImageEventKind::Loaded {
                    source: ImageSource::Network
                }
            ]
        );
        assert_eq!(h.loader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_preview_dimensions_follow_width() {
        let h = harness().await;

        h.loader.acquire(URL).await;

        let preview = h.loader.preview(URL).unwrap();
        assert_eq!((preview.width(), preview.height()), (20, 15));
        let original = h.loader.original(URL).unwrap();
        assert_eq!((original.width(), original.height()), (40, 30));
    }

    #[tokio::test]
    async fn test_oversized_preview_is_decode_failure() {
        let h = harness_with(
            MockImageFetcher::new().with_dimensions(1, 4000),
            ImageWidth::with_width(256),
        )
        .await;

        let outcome = h.loader.acquire(URL).await;

        let failure = outcome.failure().unwrap();
        assert!(!failure.retryable);
        assert!(h.loader.original(URL).is_none());
        assert!(!h.disk.cache_path(ImageTier::Original, &key(URL)).exists());
    }

    #[tokio::test]
    async fn test_disk_hit_skips_network() {
        let mut h = harness().await;
        let key = key(URL);
        h.disk
            .write_original(&key, Arc::new(image::DynamicImage::new_rgb8(8, 6)))
            .await
            .unwrap();
        h.disk
            .write_preview(&key, Arc::new(image::DynamicImage::new_rgb8(4, 3)))
            .await
            .unwrap();

        let outcome = h.loader.acquire(URL).await;

        assert_eq!(outcome.loaded().unwrap().source, ImageSource::DiskCache);
        assert_eq!(h.fetcher.total_calls(), 0);
        assert_eq!(
            kinds(&h.drain()),
            vec![ImageEventKind::Loaded {
                source: ImageSource::DiskCache
            }]
        );

        let again = h.loader.acquire(URL).await;
        assert_eq!(again.loaded().unwrap().source, ImageSource::MemoryCache);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_missing_preview_is_regenerated() {
        let h = harness().await;
        let key = key(URL);
        h.disk
            .write_original(&key, Arc::new(image::DynamicImage::new_rgb8(40, 30)))
            .await
            .unwrap();
        h.disk
            .write_preview(&key, Arc::new(image::DynamicImage::new_rgb8(20, 15)))
            .await
            .unwrap();
        std::fs::write(h.disk.cache_path(ImageTier::Preview, &key), b"garbage").unwrap();

        let outcome = h.loader.acquire(URL).await;

        let loaded = outcome.loaded().unwrap();
        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!(loaded.preview.width(), 20);
        assert_eq!(h.fetcher.total_calls(), 0);
        assert!(h.disk.read_preview(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_unreadable_original_is_storage_failure() {
        let h = harness().await;
        let key = key(URL);
        h.disk
            .write_original(&key, Arc::new(image::DynamicImage::new_rgb8(4, 4)))
            .await
            .unwrap();
        h.disk
            .write_preview(&key, Arc::new(image::DynamicImage::new_rgb8(2, 2)))
            .await
            .unwrap();
        std::fs::write(h.disk.cache_path(ImageTier::Original, &key), b"garbage").unwrap();

        let outcome = h.loader.acquire(URL).await;

        let failure = outcome.failure().unwrap();
        assert!(!failure.retryable);
        assert!(!h.disk.exists(&key).await);
        assert!(!h.disk.cache_path(ImageTier::Preview, &key).exists());
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_fetch() {
        let h = harness_with(
            MockImageFetcher::new().with_delay(Duration::from_millis(50)),
            ImageWidth::with_width(20),
        )
        .await;

        let outcomes = join_all((0..8).map(|_| h.loader.acquire(URL))).await;

        assert_eq!(h.fetcher.calls(URL), 1);
        let first = outcomes[0].loaded().unwrap();
        for outcome in &outcomes {
            let loaded = outcome.loaded().unwrap();
            assert!(Arc::ptr_eq(&loaded.original, &first.original));
        }
        assert_eq!(h.loader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_urls_sharing_a_key_share_the_flight() {
        let h = harness_with(
            MockImageFetcher::new().with_delay(Duration::from_millis(50)),
            ImageWidth::with_width(20),
        )
        .await;
        let other = format!("{URL}#zoomed");

        let (a, b) = tokio::join!(h.loader.acquire(URL), h.loader.acquire(&other));

        assert!(a.loaded().is_some());
        assert!(b.loaded().is_some());
        assert_eq!(h.fetcher.total_calls(), 1);
        assert_eq!(h.loader.state(&other), LoadState::Loaded);
        assert!(h.loader.preview(&other).is_some());
    }

    #[tokio::test]
    async fn test_cancel_leaves_no_trace() {
        let mut h = harness_with(
            MockImageFetcher::new().with_delay(Duration::from_millis(200)),
            ImageWidth::with_width(20),
        )
        .await;

        h.loader.request_load(URL);
        h.wait_for(URL, LoadState::is_loading).await;
        assert!(h.loader.is_loading(URL));

        assert!(h.loader.cancel(URL).await);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(h.loader.state(URL), LoadState::Idle);
        assert_eq!(h.loader.pending_count(), 0);
        assert!(!h.disk.exists(&key(URL)).await);
        assert!(h.loader.original(URL).is_none());
        assert_eq!(kinds(&h.drain()), vec![ImageEventKind::Loading]);
        assert!(!h.loader.cancel(URL).await);
    }

    #[tokio::test]
    async fn test_cancel_detaches_shared_url() {
        let h = harness_with(
            MockImageFetcher::new().with_delay(Duration::from_millis(100)),
            ImageWidth::with_width(20),
        )
        .await;
        let other = format!("{URL}#b");

        h.loader.request_load(URL);
        h.wait_for(URL, LoadState::is_loading).await;
        h.loader.request_load(&other);
        h.wait_for(&other, LoadState::is_loading).await;

        assert!(h.loader.cancel(&other).await);
        assert_eq!(h.loader.state(&other), LoadState::Idle);

        h.wait_for(URL, LoadState::is_loaded).await;
        assert_eq!(h.loader.state(&other), LoadState::Idle);
        assert!(h.loader.original(&other).is_none());
    }

    #[tokio::test]
    async fn test_preview_write_failure_purges_entry() {
        let h = harness().await;
        let preview_dir = h.disk.tier_dir(ImageTier::Preview);
        std::fs::remove_dir_all(&preview_dir).unwrap();
        std::fs::write(&preview_dir, b"not a directory").unwrap();

        let outcome = h.loader.acquire(URL).await;

        let failure = outcome.failure().unwrap();
        assert!(!failure.retryable);
        let key = key(URL);
        assert!(!h.disk.cache_path(ImageTier::Original, &key).exists());
        assert!(!h.disk.exists(&key).await);
        assert!(h.loader.original(URL).is_none());

        h.disk.remove(&key).await;
        h.disk.remove(&key).await;
        assert!(!h.disk.cache_path(ImageTier::Original, &key).exists());
    }

    #[tokio::test]
    async fn test_failure_is_sticky_until_retry() {
        let h = harness().await;
        h.fetcher
            .fail_with(URL, ImageError::http(503, "Service Unavailable"));

        let first = h.loader.acquire(URL).await;
        assert!(first.failure().unwrap().retryable);

        h.fetcher.succeed(URL);
        let second = h.loader.acquire(URL).await;
        assert!(second.failure().is_some());
        assert_eq!(h.fetcher.calls(URL), 1);

        let retried = h.loader.retry(URL).await;
        assert!(retried.loaded().is_some());
        assert_eq!(h.fetcher.calls(URL), 2);
        assert_eq!(h.loader.state(URL), LoadState::Loaded);
    }

    #[tokio::test]
    async fn test_failure_yields_to_entry_cached_by_shared_key() {
        let h = harness().await;
        let other = format!("{URL}#zoom");
        h.fetcher
            .fail_with(URL, ImageError::http(503, "Service Unavailable"));

        assert!(h.loader.acquire(URL).await.failure().is_some());
        assert!(h.loader.acquire(&other).await.loaded().is_some());
        assert!(h.disk.exists(&key(URL)).await);

        let outcome = h.loader.acquire(URL).await;

        let loaded = outcome.loaded().unwrap();
        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!(h.fetcher.calls(URL), 1);
        assert_eq!(h.loader.state(URL), LoadState::Loaded);
    }

    #[tokio::test]
    async fn test_forbidden_is_not_retryable() {
        let h = harness().await;
        h.fetcher.fail_with(URL, ImageError::http(403, "Forbidden"));

        let outcome = h.loader.acquire(URL).await;

        assert!(!outcome.failure().unwrap().retryable);
        assert!(h.loader.retryable_failures().is_empty());
    }

    #[tokio::test]
    async fn test_restore_retries_only_retryable_failures() {
        let h = harness().await;
        let flaky = "https://images.example.com/flaky.png";
        let broken = "https://images.example.com/broken.png";
        h.fetcher.fail_with(
            flaky,
            ImageError::transport(TransportKind::Timeout, "timed out"),
        );
        h.fetcher.fail_with(broken, ImageError::decode("bad header"));

        h.loader.acquire(flaky).await;
        h.loader.acquire(broken).await;
        assert_eq!(h.loader.retryable_failures(), vec![flaky.to_string()]);

        h.fetcher.succeed(flaky);
        h.fetcher.succeed(broken);
        h.monitor.on_network_lost();
        h.monitor.on_network_available();

        h.wait_for(flaky, LoadState::is_loaded).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.fetcher.calls(flaky), 2);
        assert_eq!(h.fetcher.calls(broken), 1);
        assert!(h.loader.state(broken).is_failed());
    }

    #[tokio::test]
    async fn test_offline_failures_are_not_announced() {
        let mut h = harness().await;
        h.monitor.on_network_lost();
        h.fetcher.fail_with(
            URL,
            ImageError::transport(TransportKind::Connect, "unreachable"),
        );

        let outcome = h.loader.acquire(URL).await;

        assert!(outcome.failure().is_some());
        assert!(h.loader.state(URL).is_failed());
        assert!(h.loader.subscribe(URL).borrow().is_failed());
        assert_eq!(kinds(&h.drain()), vec![ImageEventKind::Loading]);
    }

    #[tokio::test]
    async fn test_preview_waits_for_width() {
        let width = ImageWidth::new();
        let h = harness_with(MockImageFetcher::new(), width.clone()).await;

        h.loader.request_load(URL);
        h.wait_for(URL, LoadState::is_loading).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.loader.is_loading(URL));
        assert_eq!(h.fetcher.calls(URL), 1);

        width.set(10);
        h.wait_for(URL, LoadState::is_loaded).await;

        let preview = h.loader.preview(URL).unwrap();
        assert_eq!(preview.width(), 10);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_immediately() {
        let mut h = harness().await;

        let outcome = h.loader.acquire("ftp://example.com/a.png").await;

        assert!(!outcome.failure().unwrap().retryable);
        assert_eq!(h.fetcher.total_calls(), 0);
        let events = h.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, ImageEventKind::Failed(_)));
    }

    #[tokio::test]
    async fn test_clear_all_resets_loaded_urls() {
        let h = harness().await;
        h.loader.acquire(URL).await;

        h.loader.clear_all().await.unwrap();

        assert_eq!(h.loader.state(URL), LoadState::Idle);
        assert!(h.loader.original(URL).is_none());
        assert!(!h.disk.exists(&key(URL)).await);

        let outcome = h.loader.acquire(URL).await;
        assert_eq!(outcome.loaded().unwrap().source, ImageSource::Network);
        assert_eq!(h.fetcher.calls(URL), 2);
    }

    #[tokio::test]
    async fn test_memory_stats_track_hits() {
        let h = harness().await;
        h.loader.acquire(URL).await;
        h.loader.acquire(URL).await;

        let stats = h.loader.memory_cache_stats(ImageTier::Original);
        assert_eq!(stats.size, 1);
        assert!(stats.hits >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let h = harness_with(
            MockImageFetcher::new().with_delay(Duration::from_secs(5)),
            ImageWidth::with_width(20),
        )
        .await;
        let other = "https://images.example.com/dog.png";

        h.loader.request_load(URL);
        h.loader.request_load(other);
        h.wait_for(URL, LoadState::is_loading).await;
        h.wait_for(other, LoadState::is_loading).await;
        assert_eq!(h.loader.pending_count(), 2);

        h.loader.shutdown().await;

        assert_eq!(h.loader.pending_count(), 0);
        assert_eq!(h.loader.state(URL), LoadState::Idle);
        assert_eq!(h.loader.state(other), LoadState::Idle);
    }
}
