//! Per-upload digitize chains built from the individual stages.

use geojson::{FeatureCollection, JsonObject};
use image::RgbImage;
use sketchmap_core::error::CoreError;
use sketchmap_core::qr_payload::QrPayload;
use sketchmap_core::types::Bbox;

use crate::clip::{clip_with, ClipConfig};
use crate::detect::models::{MarkingModels, PromptSegmenter};
use crate::detect::{detect_markings, DetectConfig, Marking};
use crate::georeference::{georeference_gray, georeference_rgb};
use crate::merge::SOURCE_MEMBER;
use crate::polygonize::polygonize_geotiff;
use crate::postprocess::{post_process, PostProcessConfig};
use crate::qr::read_payload;
use crate::raster::decode_rgb;

#[derive(Debug, Clone)]
pub struct DigitizeConfig {
    pub clip: ClipConfig,
    pub detect: DetectConfig,
    pub post: PostProcessConfig,
}

impl Default for DigitizeConfig {
    fn default() -> Self {
        Self {
            clip: ClipConfig::standard(),
            detect: DetectConfig::default(),
            post: PostProcessConfig::default(),
        }
    }
}

/// An uploaded sketch map with its decoded QR payload.
#[derive(Debug, Clone)]
pub struct DecodedUpload {
    pub image: RgbImage,
    pub payload: QrPayload,
}

/// Decode the upload bytes and read its QR code.
pub fn decode_upload(bytes: &[u8]) -> Result<DecodedUpload, CoreError> {
    let image = decode_rgb(bytes)?;
    let payload = read_payload(&image::imageops::grayscale(&image))?;
    Ok(DecodedUpload { image, payload })
}

/// Georeference, polygonize and post-process each marking separately and
/// concatenate the resulting features.
pub fn markings_to_features(
    markings: &[Marking],
    bbox: &Bbox,
    name: &str,
    config: &PostProcessConfig,
) -> Result<FeatureCollection, CoreError> {
    let mut features = Vec::new();
    for marking in markings {
        let geotiff = georeference_gray(&marking.color_raster(), bbox)?;
        let polygons = polygonize_geotiff(&geotiff)?;
        let processed = post_process(polygons, name, bbox, config)?;
        features.extend(processed.features);
    }
    let mut members = JsonObject::new();
    members.insert(SOURCE_MEMBER.into(), name.into());
    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    })
}

/// Vector chain for an already clipped sketch.
pub fn vectorize_clipped(
    clipped: &RgbImage,
    template: &RgbImage,
    bbox: &Bbox,
    name: &str,
    models: &MarkingModels,
    segmenter: &dyn PromptSegmenter,
    config: &DigitizeConfig,
) -> Result<FeatureCollection, CoreError> {
    let markings = detect_markings(clipped, template, models, segmenter, &config.post.catalogue, &config.detect)?;
    tracing::debug!(name, markings = markings.len(), "markings segmented");
    markings_to_features(&markings, bbox, name, &config.post)
}

/// Full vector chain: clip the photo onto the template, then vectorize.
pub fn vectorize_upload(
    photo: &RgbImage,
    template: &RgbImage,
    bbox: &Bbox,
    name: &str,
    models: &MarkingModels,
    segmenter: &dyn PromptSegmenter,
    config: &DigitizeConfig,
) -> Result<FeatureCollection, CoreError> {
    let clipped = clip_with(photo, template, &config.clip)?;
    vectorize_clipped(&clipped.image, template, bbox, name, models, segmenter, config)
}

/// Raster chain: clip the photo and georeference it as a three band
/// GeoTIFF.
pub fn georeference_upload(
    photo: &RgbImage,
    template: &RgbImage,
    bbox: &Bbox,
    config: &DigitizeConfig,
) -> Result<Vec<u8>, CoreError> {
    let clipped = clip_with(photo, template, &config.clip)?;
    Ok(georeference_rgb(&clipped.image, bbox)?)
}
