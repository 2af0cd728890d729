//! Preview generation for grid cells.

use image::DynamicImage;
use image::imageops::FilterType;

use crate::domain::errors::ImageError;

/// Largest preview, in pixels, that will be rendered.
///
/// Equivalent to 4096x4096. Extreme aspect ratios would otherwise scale a
/// thin strip into a buffer of several hundred megabytes.
pub const MAX_PREVIEW_PIXELS: u64 = 4096 * 4096;

/// Height of a preview scaled to `target_width`.
///
/// Uses truncating integer division: `floor(height * target_width / width)`.
/// Returns 0 for a zero-width source.
#[must_use]
pub fn preview_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    let scaled = u64::from(height) * u64::from(target_width) / u64::from(width);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Rescales `image` to `target_width`, preserving the aspect ratio.
///
/// Resizing is unfiltered (nearest neighbour). A computed dimension of zero
/// is clamped to one pixel so the preview remains encodable.
///
/// # Errors
/// Returns [`ImageError::Decode`] if the preview would exceed
/// [`MAX_PREVIEW_PIXELS`].
pub fn generate_preview(
    image: &DynamicImage,
    target_width: u32,
) -> Result<DynamicImage, ImageError> {
    let width = target_width.max(1);
    let height = preview_height(image.width(), image.height(), target_width).max(1);
    if u64::from(width) * u64::from(height) > MAX_PREVIEW_PIXELS {
        return Err(ImageError::decode(format!(
            "preview of {}x{} source would be {width}x{height}",
            image.width(),
            image.height()
        )));
    }
    Ok(image.resize_exact(width, height, FilterType::Nearest))
}
