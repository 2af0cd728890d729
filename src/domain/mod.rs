//! Domain layer with core image entities and port definitions.

/// Connectivity state definitions.
pub mod connection;
/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use connection::{ConnectionState, ConnectivityEvent};
pub use entities::{ImageFailure, ImageKey, ImageSource, ImageTier, LoadState, LoadedImage};
pub use errors::ImageError;
pub use ports::{ImageCachePort, ImageFetcherPort, ReachabilityProbe};
