//! Port for active reachability checks.

use async_trait::async_trait;

/// Actively checks whether the network is usable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns true if a connection to the reachability target succeeded.
    async fn probe(&self) -> bool;
}
