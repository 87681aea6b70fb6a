//! Marking detector: difference image, box detection, color
//! classification, prompted segmentation and mask cleanup.

pub mod difference;
pub mod models;
pub mod morphology;
#[cfg(feature = "with-tch")]
pub mod torch;

use image::{GrayImage, Luma, RgbImage};
use sketchmap_core::colors::ColorCatalogue;
use sketchmap_core::error::CoreError;

use difference::difference_image;
use models::{BoundingBox, MarkingModels, PromptSegmenter};
use morphology::{clean_mask, FOREGROUND};

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("sketch is {sketch:?} but map frame is {frame:?}")]
    SizeMismatch { sketch: (u32, u32), frame: (u32, u32) },

    #[error("model inference failed: {0}")]
    Inference(String),

    /// The accelerator ran out of memory; the caller may retry on CPU.
    #[error("out of device memory: {0}")]
    OutOfMemory(String),

    #[error("segmenter returned {got} masks for {expected} boxes")]
    MaskCount { expected: usize, got: usize },
}

impl From<DetectError> for CoreError {
    fn from(err: DetectError) -> Self {
        CoreError::ModelInference(format!("Marking detection failed: {err}"))
    }
}

/// One detected pen marking on the map frame.
#[derive(Debug, Clone)]
pub struct Marking {
    /// Binary mask over the map frame pixels.
    pub mask: GrayImage,
    pub bbox: BoundingBox,
    /// Catalogue index, never the background index.
    pub color_index: u8,
}

impl Marking {
    /// Single band raster holding the color index on the marking and zero
    /// elsewhere.
    pub fn color_raster(&self) -> GrayImage {
        let (w, h) = self.mask.dimensions();
        GrayImage::from_fn(w, h, |x, y| {
            Luma([if self.mask.get_pixel(x, y).0[0] == FOREGROUND { self.color_index } else { 0 }])
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectConfig {
    /// Zero out difference amplitudes at or below this value.
    pub difference_threshold: Option<u8>,
}

/// Detect markings on the clipped `sketch` relative to the blank `frame`.
///
/// Zero detections yield an empty list. Boxes whose classifier label has no
/// catalogue entry are dropped with a warning.
pub fn detect_markings(
    sketch: &RgbImage,
    frame: &RgbImage,
    models: &MarkingModels,
    segmenter: &dyn PromptSegmenter,
    catalogue: &ColorCatalogue,
    config: &DetectConfig,
) -> Result<Vec<Marking>, DetectError> {
    let diff = difference_image(sketch, frame, config.difference_threshold)?;
    let boxes = models.detector.detect(sketch, &diff)?;
    tracing::debug!(boxes = boxes.len(), "markings detected");
    if boxes.is_empty() {
        return Ok(Vec::new());
    }

    let (w, h) = sketch.dimensions();
    let mut kept = Vec::with_capacity(boxes.len());
    for bbox in boxes {
        let Some((x, y, cw, ch)) = bbox.pixel_rect(w, h) else {
            continue;
        };
        let crop = image::imageops::crop_imm(sketch, x, y, cw, ch).to_image();
        let label = models.classifier.classify(&crop)?;
        match catalogue.index_for_label(label) {
            Some(color_index) => kept.push((bbox, color_index)),
            None => tracing::warn!(label, "classifier label outside the color catalogue, marking dropped"),
        }
    }
    if kept.is_empty() {
        return Ok(Vec::new());
    }

    let prompts: Vec<BoundingBox> = kept.iter().map(|(b, _)| *b).collect();
    let masks = segmenter.segment(sketch, &prompts)?;
    if masks.len() != prompts.len() {
        return Err(DetectError::MaskCount {
            expected: prompts.len(),
            got: masks.len(),
        });
    }

    let markings = kept
        .into_iter()
        .zip(masks)
        .filter_map(|((bbox, color_index), mask)| {
            if mask.dimensions() != (w, h) {
                tracing::warn!(?bbox, "segmenter mask has wrong size, marking dropped");
                return None;
            }
            let mask = clean_mask(&mask, bbox.width(), bbox.height());
            mask.pixels().any(|p| p.0[0] == FOREGROUND).then_some(Marking {
                mask,
                bbox,
                color_index,
            })
        })
        .collect();
    Ok(markings)
}
