//! Frame clipper: locate the map frame inside a photograph and warp it onto
//! the template's pixel grid.

pub mod features;
pub mod homography;
pub mod matcher;
pub mod warp;

use image::imageops::grayscale;
use image::RgbImage;
use nalgebra::Matrix3;
use sketchmap_core::error::CoreError;

use features::{detect_and_describe, FeatureConfig};
use homography::{fit_homography_ransac, HomographyError, RansacConfig};
use matcher::{match_descriptors, MatcherConfig};
use warp::warp_perspective;

#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    #[error("not enough matching keypoints: need {needed}, found {found}")]
    TooFewMatches { needed: usize, found: usize },

    #[error(transparent)]
    Homography(#[from] HomographyError),

    #[error("homography is not invertible")]
    Singular,
}

impl From<ClipError> for CoreError {
    fn from(err: ClipError) -> Self {
        CoreError::Validation(format!(
            "The map frame could not be located on the uploaded photo ({err}). \
             Please upload a sharper photo or scan of the whole sketch map."
        ))
    }
}

/// Translations beyond this band mark a homography as implausible.
#[derive(Debug, Clone, Copy)]
pub struct PlausibilityBand {
    pub max_tx: f64,
    pub max_ty: f64,
}

impl Default for PlausibilityBand {
    fn default() -> Self {
        Self {
            max_tx: 1500.0,
            max_ty: 0.0,
        }
    }
}

impl PlausibilityBand {
    pub fn accepts(&self, h: &Matrix3<f64>) -> bool {
        !(h[(0, 2)] > self.max_tx && h[(1, 2)] > self.max_ty)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClipConfig {
    pub features: FeatureConfig,
    pub matcher: MatcherConfig,
    pub ransac: RansacConfig,
    pub min_good_matches: usize,
    /// `None` disables the plausibility filter.
    pub plausibility: Option<PlausibilityBand>,
}

impl ClipConfig {
    pub fn standard() -> Self {
        Self {
            min_good_matches: 10,
            plausibility: Some(PlausibilityBand::default()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clipped {
    pub image: RgbImage,
    /// Maps photo pixels onto template pixels.
    pub homography: Matrix3<f64>,
    pub n_matches: usize,
    pub n_inliers: usize,
    /// False when the plausibility filter blanked the output.
    pub plausible: bool,
}

/// Clip `photo` to the map frame `template` with the standard settings.
pub fn clip(photo: &RgbImage, template: &RgbImage) -> Result<RgbImage, ClipError> {
    clip_with(photo, template, &ClipConfig::standard()).map(|c| c.image)
}

pub fn clip_with(photo: &RgbImage, template: &RgbImage, config: &ClipConfig) -> Result<Clipped, ClipError> {
    let (tw, th) = template.dimensions();

    let (photo_kp, photo_desc) = detect_and_describe(&grayscale(photo), &config.features);
    let (template_kp, template_desc) = detect_and_describe(&grayscale(template), &config.features);
    tracing::debug!(
        photo_keypoints = photo_kp.len(),
        template_keypoints = template_kp.len(),
        "keypoints detected"
    );

    let matches = match_descriptors(&photo_desc, &template_desc, &config.matcher);
    let needed = config.min_good_matches.max(4);
    if matches.len() < needed {
        return Err(ClipError::TooFewMatches {
            needed,
            found: matches.len(),
        });
    }

    let src: Vec<[f64; 2]> = matches
        .iter()
        .map(|m| [photo_kp[m.query].x as f64, photo_kp[m.query].y as f64])
        .collect();
    let dst: Vec<[f64; 2]> = matches
        .iter()
        .map(|m| [template_kp[m.train].x as f64, template_kp[m.train].y as f64])
        .collect();
    let fit = fit_homography_ransac(&src, &dst, &config.ransac)?;

    if let Some(band) = config.plausibility {
        if !band.accepts(&fit.h) {
            tracing::warn!(
                tx = fit.h[(0, 2)],
                ty = fit.h[(1, 2)],
                "implausible homography, emitting blank frame"
            );
            return Ok(Clipped {
                image: RgbImage::new(tw, th),
                homography: fit.h,
                n_matches: matches.len(),
                n_inliers: fit.n_inliers,
                plausible: false,
            });
        }
    }

    let image = warp_perspective(photo, &fit.h, tw, th).ok_or(ClipError::Singular)?;
    Ok(Clipped {
        image,
        homography: fit.h,
        n_matches: matches.len(),
        n_inliers: fit.n_inliers,
        plausible: true,
    })
}
