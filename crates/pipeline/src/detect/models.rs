//! Model seams of the marking detector.
//!
//! Workers load concrete models once at startup and hand them to tasks
//! behind these traits; tests substitute fakes.

use std::sync::Arc;

use image::{GrayImage, RgbImage};

use super::DetectError;

/// Axis-aligned box in pixel coordinates, `(x0, y0)` inclusive top-left and
/// `(x1, y1)` exclusive bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to an image, or `None`
    /// when nothing of the box lies inside.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x0.floor().clamp(0.0, width as f32) as u32;
        let y0 = self.y0.floor().clamp(0.0, height as f32) as u32;
        let x1 = self.x1.ceil().clamp(0.0, width as f32) as u32;
        let y1 = self.y1.ceil().clamp(0.0, height as f32) as u32;
        (x1 > x0 && y1 > y0).then_some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Detects marking boxes on the four-band (R, G, B, difference) input.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, image: &RgbImage, difference: &GrayImage) -> Result<Vec<BoundingBox>, DetectError>;
}

/// Classifies the pen color of a cropped marking. Returns the top-1
/// classifier label.
pub trait ColorClassifier: Send + Sync {
    fn classify(&self, crop: &RgbImage) -> Result<usize, DetectError>;
}

/// Zero-shot segmenter prompted with boxes on one preloaded image. Returns
/// the best mask per box, each the size of `image`.
pub trait PromptSegmenter: Send + Sync {
    fn segment(&self, image: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<GrayImage>, DetectError>;
}

/// Detector and classifier trained for one base map family.
#[derive(Clone)]
pub struct MarkingModels {
    pub detector: Arc<dyn ObjectDetector>,
    pub classifier: Arc<dyn ColorClassifier>,
}

impl std::fmt::Debug for MarkingModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkingModels").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_rect_is_clamped() {
        let b = BoundingBox {
            x0: -3.2,
            y0: 4.5,
            x1: 12.1,
            y1: 30.0,
        };
        assert_eq!(b.pixel_rect(10, 20), Some((0, 4, 10, 16)));
        assert!((b.width() - 15.3).abs() < 1e-4);
    }

    #[test]
    fn box_outside_image_has_no_rect() {
        let b = BoundingBox {
            x0: 50.0,
            y0: 50.0,
            x1: 60.0,
            y1: 60.0,
        };
        assert_eq!(b.pixel_rect(10, 10), None);
    }
}
