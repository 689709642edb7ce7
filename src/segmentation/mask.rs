use std::io::Cursor;

use image::{ImageFormat, RgbaImage};

use crate::models::MaskImage;

use super::error::SegmentationError;

/// Smallest rectangle (inclusive pixel coords) whose alpha exceeds `threshold`.
fn opaque_bounds(image: &RgbaImage, threshold: u8) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] <= threshold {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
        });
    }
    bounds
}

/// Decodes a downloaded mask and crops it to its visible content plus
/// `padding` pixels on each side. When nothing clears the alpha threshold the
/// original bytes are returned untouched.
pub fn tighten_to_opaque(
    bytes: Vec<u8>,
    alpha_threshold: u8,
    padding: u32,
) -> Result<MaskImage, SegmentationError> {
    let decoded = image::load_from_memory(&bytes)?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();

    let Some((min_x, min_y, max_x, max_y)) = opaque_bounds(&rgba, alpha_threshold) else {
        return Ok(MaskImage::new(bytes, width, height, false));
    };

    let x0 = min_x.saturating_sub(padding);
    let y0 = min_y.saturating_sub(padding);
    let x1 = max_x.saturating_add(padding).min(width - 1);
    let y1 = max_y.saturating_add(padding).min(height - 1);
    let crop_width = x1 - x0 + 1;
    let crop_height = y1 - y0 + 1;

    let cropped = image::imageops::crop_imm(&rgba, x0, y0, crop_width, crop_height).to_image();
    let mut encoded = Cursor::new(Vec::new());
    cropped.write_to(&mut encoded, ImageFormat::Png)?;

    Ok(MaskImage::new(encoded.into_inner(), crop_width, crop_height, true))
}
