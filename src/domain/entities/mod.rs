//! Domain entity definitions.

mod image;

pub use image::{
    ImageFailure, ImageKey, ImageSource, ImageTier, LoadState, LoadedImage, parse_image_url,
};
