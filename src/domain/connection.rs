/// Connectivity transition broadcast by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Connectivity went from present to absent.
    Lost,
    /// Connectivity went from absent to present.
    Restored,
}

/// Rolling pair of the last two connectivity samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// Sample before the latest one.
    pub previous: bool,
    /// Latest sample.
    pub current: bool,
}

impl ConnectionState {
    /// Creates a state where both samples equal `online`.
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            previous: online,
            current: online,
        }
    }

    /// Shifts the window by one sample.
    #[must_use]
    pub const fn advance(self, sample: bool) -> Self {
        Self {
            previous: self.current,
            current: sample,
        }
    }

    /// Returns true on the offline to online edge.
    #[must_use]
    pub const fn is_restored(&self) -> bool {
        !self.previous && self.current
    }

    /// Returns true on the online to offline edge.
    #[must_use]
    pub const fn is_lost(&self) -> bool {
        self.previous && !self.current
    }

    /// Returns the edge event for the latest sample, if any.
    #[must_use]
    pub const fn transition(&self) -> Option<ConnectivityEvent> {
        if self.is_restored() {
            Some(ConnectivityEvent::Restored)
        } else if self.is_lost() {
            Some(ConnectivityEvent::Lost)
        } else {
            None
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(true)
    }
}
