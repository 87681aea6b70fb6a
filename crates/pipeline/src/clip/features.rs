//! Binary keypoint features in the style of BRISK.
//!
//! Corners come from a FAST-9 segment test on every level of a dyadic
//! pyramid. Each corner is described by 512 intensity comparisons between
//! points of a concentric-ring sampling pattern. The pattern is rotated by
//! the keypoint orientation, estimated from long-distance point pairs, so
//! descriptors are rotation invariant; the pyramid gives scale invariance.

use std::sync::LazyLock;

use image::imageops::FilterType;
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use imageproc::suppress::local_maxima;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::raster::sample_bilinear_gray;

/// Descriptor length in 64-bit words (512 bits).
pub const DESCRIPTOR_WORDS: usize = 8;

const DESCRIPTOR_BITS: usize = DESCRIPTOR_WORDS * 64;

/// Pixels kept free around a keypoint so the rotated pattern fits.
const BORDER: u32 = 12;

const RING_RADII: [f32; 5] = [0.0, 2.9, 4.9, 7.4, 10.8];
const RING_POINTS: [usize; 5] = [1, 10, 14, 15, 20];
const PATTERN_SCALE: f32 = 0.85;
const SHORT_PAIR_MAX_DIST: f32 = 5.85;
const LONG_PAIR_MIN_DIST: f32 = 8.2;

/// Smoothing applied before sampling the pattern.
const PATTERN_SIGMA: f32 = 1.2;

#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Segment test intensity threshold.
    pub fast_threshold: u8,
    pub max_octaves: usize,
    /// Keypoints kept per image; a random subset is drawn beyond this.
    pub max_keypoints: usize,
    pub seed: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 30,
            max_octaves: 4,
            max_keypoints: 50_000,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Position in full-resolution pixel coordinates.
    pub x: f32,
    pub y: f32,
    pub octave: usize,
    /// Orientation in radians.
    pub angle: f32,
    pub response: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; DESCRIPTOR_WORDS]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    pub fn bit(&self, index: usize) -> bool {
        self.0[index / 64] >> (index % 64) & 1 == 1
    }
}

struct SamplingPattern {
    points: Vec<(f32, f32)>,
    short_pairs: Vec<(usize, usize)>,
    long_pairs: Vec<(usize, usize)>,
}

static PATTERN: LazyLock<SamplingPattern> = LazyLock::new(build_pattern);

fn build_pattern() -> SamplingPattern {
    let mut points = Vec::new();
    for (ring, (&radius, &count)) in RING_RADII.iter().zip(RING_POINTS.iter()).enumerate() {
        let offset = if ring % 2 == 1 {
            std::f32::consts::PI / count as f32
        } else {
            0.0
        };
        for k in 0..count {
            let theta = 2.0 * std::f32::consts::PI * k as f32 / count as f32 + offset;
            let r = radius * PATTERN_SCALE;
            points.push((r * theta.cos(), r * theta.sin()));
        }
    }

    let mut short_pairs = Vec::new();
    let mut long_pairs = Vec::new();
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let d = ((points[i].0 - points[j].0).powi(2) + (points[i].1 - points[j].1).powi(2)).sqrt();
            if d < SHORT_PAIR_MAX_DIST && short_pairs.len() < DESCRIPTOR_BITS {
                short_pairs.push((i, j));
            } else if d > LONG_PAIR_MIN_DIST {
                long_pairs.push((i, j));
            }
        }
    }

    SamplingPattern {
        points,
        short_pairs,
        long_pairs,
    }
}

/// Detect keypoints and compute descriptors.
///
/// Keypoints too close to the border for the sampling pattern are dropped,
/// so both returned vectors have the same length.
pub fn detect_and_describe(gray: &GrayImage, config: &FeatureConfig) -> (Vec<Keypoint>, Vec<Descriptor>) {
    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();

    let mut level = gray.clone();
    for octave in 0..config.max_octaves {
        let (w, h) = level.dimensions();
        if w < 2 * BORDER + 8 || h < 2 * BORDER + 8 {
            break;
        }
        let smoothed = gaussian_blur_f32(&level, PATTERN_SIGMA);
        let scale = (1u32 << octave) as f32;
        for corner in fast_corners(&level, config.fast_threshold) {
            let (x, y) = (corner.x as f32, corner.y as f32);
            let angle = orientation(&smoothed, x, y);
            let Some(descriptor) = describe(&smoothed, x, y, angle) else {
                continue;
            };
            keypoints.push(Keypoint {
                x: (x + 0.5) * scale - 0.5,
                y: (y + 0.5) * scale - 0.5,
                octave,
                angle,
                response: corner.score,
            });
            descriptors.push(descriptor);
        }
        level = image::imageops::resize(&level, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
    }

    if keypoints.len() > config.max_keypoints {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut keep = rand::seq::index::sample(&mut rng, keypoints.len(), config.max_keypoints).into_vec();
        keep.sort_unstable();
        keypoints = keep.iter().map(|&i| keypoints[i]).collect();
        descriptors = keep.iter().map(|&i| descriptors[i]).collect();
    }

    (keypoints, descriptors)
}

/// FAST-9 corners with 3x3 non-maximum suppression, away from the border.
pub fn fast_corners(image: &GrayImage, threshold: u8) -> Vec<Corner> {
    let (w, h) = image.dimensions();
    if w <= 2 * BORDER || h <= 2 * BORDER {
        return Vec::new();
    }
    let inner = |v: u32, len: u32| v >= BORDER && v < len - BORDER;
    let corners: Vec<Corner> = corners_fast9(image, threshold)
        .into_iter()
        .filter(|c| inner(c.x, w) && inner(c.y, h))
        .collect();
    local_maxima(&corners, 1)
}

fn pattern_samples(smoothed: &GrayImage, x: f32, y: f32, angle: f32) -> Option<Vec<f32>> {
    let (sin, cos) = angle.sin_cos();
    PATTERN
        .points
        .iter()
        .map(|&(px, py)| {
            let sx = x + cos * px - sin * py;
            let sy = y + sin * px + cos * py;
            sample_bilinear_gray(smoothed, sx, sy)
        })
        .collect()
}

/// Keypoint direction from the mean local gradient over long pairs.
fn orientation(smoothed: &GrayImage, x: f32, y: f32) -> f32 {
    let Some(samples) = pattern_samples(smoothed, x, y, 0.0) else {
        return 0.0;
    };
    let (mut gx, mut gy) = (0f32, 0f32);
    for &(i, j) in &PATTERN.long_pairs {
        let (pi, pj) = (PATTERN.points[i], PATTERN.points[j]);
        let (dx, dy) = (pj.0 - pi.0, pj.1 - pi.1);
        let norm2 = dx * dx + dy * dy;
        let diff = samples[j] - samples[i];
        gx += diff * dx / norm2;
        gy += diff * dy / norm2;
    }
    gy.atan2(gx)
}

fn describe(smoothed: &GrayImage, x: f32, y: f32, angle: f32) -> Option<Descriptor> {
    let samples = pattern_samples(smoothed, x, y, angle)?;
    let mut words = [0u64; DESCRIPTOR_WORDS];
    for (bit, &(i, j)) in PATTERN.short_pairs.iter().enumerate() {
        if samples[j] > samples[i] {
            words[bit / 64] |= 1 << (bit % 64);
        }
    }
    Some(Descriptor(words))
}
