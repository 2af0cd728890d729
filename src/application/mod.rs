//! Application layer with pure image services.

/// Image services shared by the infrastructure adapters.
pub mod services;

pub use services::{ImageWidth, generate_preview, preview_height};
