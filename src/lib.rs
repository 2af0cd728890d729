//! picgrid - image acquisition and caching for scrollable image grids.
//!
//! This crate downloads remote images, persists an original and a scaled
//! preview per image, keeps decoded copies in memory, deduplicates
//! concurrent requests and retries failed loads when connectivity returns.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing pure image services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, fetchers and connectivity adapters.
pub mod infrastructure;
/// Presentation layer reporting image events to the terminal.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "picgrid";
