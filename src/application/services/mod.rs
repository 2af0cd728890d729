pub mod image_width;
pub mod preview_generator;

pub use image_width::ImageWidth;
pub use preview_generator::{generate_preview, preview_height};
