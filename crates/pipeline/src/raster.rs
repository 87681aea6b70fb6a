//! Image decoding, encoding and pixel helpers shared by the stages.

use std::io::Cursor;

use image::{GrayImage, ImageFormat, RgbImage};
use sketchmap_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("The uploaded file is not a supported image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

impl From<RasterError> for CoreError {
    fn from(err: RasterError) -> Self {
        match err {
            RasterError::Decode(_) => CoreError::Validation(err.to_string()),
            RasterError::Encode(_) => CoreError::Internal(err.to_string()),
        }
    }
}

/// Decode any supported image format into 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, RasterError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| RasterError::Decode(e.to_string()))
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, RasterError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| RasterError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, RasterError> {
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|e| RasterError::Encode(e.to_string()))?;
    Ok(buf)
}

/// ITU-R BT.601 luma, matching the weights used for training inputs.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Bilinear sample of a gray image at a sub-pixel position. Positions
/// outside the image yield `None`.
pub fn sample_bilinear_gray(image: &GrayImage, x: f32, y: f32) -> Option<f32> {
    let (w, h) = image.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let p = |xx: u32, yy: u32| image.get_pixel(xx, yy).0[0] as f32;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn png_round_trip_keeps_pixels() {
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let decoded = decode_rgb(&encode_png(&img).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 2), &Rgb([10, 20, 30]));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(decode_rgb(b"not an image"), Err(RasterError::Decode(_))));
    }

    #[test]
    fn luma_of_primaries() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 0, 0), 76);
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 100 }]));
        assert_eq!(sample_bilinear_gray(&img, 0.5, 0.0), Some(50.0));
        assert_eq!(sample_bilinear_gray(&img, 1.5, 0.0), None);
    }
}
