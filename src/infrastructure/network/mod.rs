//! Connectivity monitoring.

pub mod connectivity;
pub mod reachability;

pub use connectivity::{ConnectivityMonitor, DEFAULT_PROBE_INTERVAL};
pub use reachability::{DEFAULT_PROBE_URL, HttpReachabilityProbe};
