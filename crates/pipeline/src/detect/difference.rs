//! Difference enhancement between a marked sketch and its blank map frame.

use image::{GrayImage, Luma, Rgb, RgbImage};

use super::DetectError;
use crate::raster::luma;

pub const CONTRAST_FACTOR: f32 = 2.0;

/// Scale every channel away from the mean luma of the image by `factor`.
pub fn enhance_contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let n = (image.width() as u64 * image.height() as u64).max(1);
    let sum: u64 = image
        .pixels()
        .map(|p| luma(p.0[0], p.0[1], p.0[2]) as u64)
        .sum();
    let mean = (sum as f32 / n as f32 + 0.5).floor();

    let mut out = image.clone();
    for p in out.pixels_mut() {
        *p = Rgb(p.0.map(|c| (mean + factor * (c as f32 - mean)).round().clamp(0.0, 255.0) as u8));
    }
    out
}

/// Grayscale absolute difference between the contrast-enhanced sketch and
/// the map frame. Amplitudes at or below `threshold` are zeroed.
pub fn difference_image(sketch: &RgbImage, frame: &RgbImage, threshold: Option<u8>) -> Result<GrayImage, DetectError> {
    if sketch.dimensions() != frame.dimensions() {
        return Err(DetectError::SizeMismatch {
            sketch: sketch.dimensions(),
            frame: frame.dimensions(),
        });
    }
    let enhanced = enhance_contrast(sketch, CONTRAST_FACTOR);
    let (w, h) = frame.dimensions();
    Ok(GrayImage::from_fn(w, h, |x, y| {
        let a = enhanced.get_pixel(x, y).0;
        let b = frame.get_pixel(x, y).0;
        let d = luma(a[0].abs_diff(b[0]), a[1].abs_diff(b[1]), a[2].abs_diff(b[2]));
        match threshold {
            Some(t) if d <= t => Luma([0]),
            _ => Luma([d]),
        }
    }))
}
