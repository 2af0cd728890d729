//! Online/offline tracking with edge-triggered transition events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::domain::connection::{ConnectionState, ConnectivityEvent};
use crate::domain::ports::ReachabilityProbe;

/// Default delay between two reachability probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

const EVENT_CAPACITY: usize = 16;

/// Tracks connectivity from OS callbacks and periodic probes.
///
/// Both sources feed the same [`ConnectionState`]. Only edges are broadcast:
/// a run of identical samples produces at most one event.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ConnectivityEvent>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor that assumes the network is available.
    #[must_use]
    pub fn new(probe: Arc<dyn ReachabilityProbe>, interval: Duration) -> Self {
        Self::with_initial_state(probe, interval, true)
    }

    /// Creates a monitor starting from a known connectivity sample.
    #[must_use]
    pub fn with_initial_state(
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
        online: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            online: AtomicBool::new(online),
            state: Mutex::new(ConnectionState::new(online)),
            events,
            probe,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Returns the latest connectivity sample.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Returns the last two samples.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Subscribes to connectivity transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Records a connectivity sample and broadcasts the resulting edge.
    pub fn report(&self, online: bool) -> Option<ConnectivityEvent> {
        let event = {
            let mut state = self.state.lock();
            *state = state.advance(online);
            self.online.store(online, Ordering::Relaxed);
            state.transition()
        };

        if let Some(event) = event {
            match event {
                ConnectivityEvent::Restored => info!("Network connectivity restored"),
                ConnectivityEvent::Lost => info!("Network connectivity lost"),
            }
            // Fails only when nobody subscribed.
            let _ = self.events.send(event);
        }
        event
    }

    /// OS callback for an available network.
    pub fn on_network_available(&self) -> Option<ConnectivityEvent> {
        self.report(true)
    }

    /// OS callback for a lost network.
    pub fn on_network_lost(&self) -> Option<ConnectivityEvent> {
        self.report(false)
    }

    /// Returns true while the probe loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the periodic probe loop. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(self);
        let running = self.running.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                let online = monitor.probe.probe().await;
                debug!(online, "Reachability sample");
                monitor.report(online);
            }

            debug!("Connectivity probe loop stopped");
        });

        *self.task.lock() = Some(handle);
        debug!(interval_secs = interval.as_secs(), "Connectivity monitor started");
    }

    /// Stops the probe loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::domain::ports::mocks::MockReachabilityProbe;

    fn idle_probe() -> Arc<dyn ReachabilityProbe> {
        let mut probe = MockReachabilityProbe::new();
        probe.expect_probe().never();
        Arc::new(probe)
    }

    #[test]
    fn test_repeated_samples_emit_once() {
        let monitor = ConnectivityMonitor::new(idle_probe(), DEFAULT_PROBE_INTERVAL);
        let mut events = monitor.subscribe();

        assert_eq!(monitor.on_network_lost(), Some(ConnectivityEvent::Lost));
        assert_eq!(monitor.on_network_lost(), None);
        assert!(!monitor.is_online());

        assert_eq!(
            monitor.on_network_available(),
            Some(ConnectivityEvent::Restored)
        );
        assert_eq!(monitor.report(true), None);
        assert!(monitor.is_online());

        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Lost);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Restored);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_initial_offline_state() {
        let monitor =
            ConnectivityMonitor::with_initial_state(idle_probe(), DEFAULT_PROBE_INTERVAL, false);

        assert!(!monitor.is_online());
        assert_eq!(monitor.state(), ConnectionState::new(false));
        assert_eq!(monitor.report(true), Some(ConnectivityEvent::Restored));
    }

    #[tokio::test]
    async fn test_probe_loop_feeds_state() {
        let samples = Arc::new(AtomicUsize::new(0));
        let mut probe = MockReachabilityProbe::new();
        {
            let samples = samples.clone();
            // offline, offline, then online for good
            probe
                .expect_probe()
                .returning(move || samples.fetch_add(1, Ordering::SeqCst) >= 2);
        }

        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(probe),
            Duration::from_millis(10),
        ));
        let mut events = monitor.subscribe();
        monitor.start();
        assert!(monitor.is_running());

        let first = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, ConnectivityEvent::Lost);
        assert_eq!(second, ConnectivityEvent::Restored);
        assert!(monitor.is_online());

        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let mut probe = MockReachabilityProbe::new();
        probe.expect_probe().returning(|| true);

        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(probe),
            Duration::from_secs(60),
        ));
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
    }
}
