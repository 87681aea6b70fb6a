//! Homography estimation: normalized DLT inside a seeded RANSAC loop.

use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HomographyError {
    #[error("too few correspondences: need {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    #[error("insufficient inliers: need {needed}, found {found}")]
    InsufficientInliers { needed: usize, found: usize },
}

/// Map a point through `H * [x, y, 1]^T`.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> [f64; 2] {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [p[0] / p[2], p[1] / p[2]]
}

fn reprojection_error(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2]) -> f64 {
    let p = project(h, src[0], src[1]);
    ((p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2)).sqrt()
}

/// Translate the centroid to the origin and scale to a mean distance of
/// sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();
    (t, normalized)
}

/// Direct linear transform from at least four correspondences, returning
/// `H` with `dst ~ project(H, src)` and `H[2][2] == 1`.
pub fn estimate_homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, HomographyError> {
    let n = src.len().min(dst.len());
    if n < 4 {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }
    if src.len() != dst.len() {
        return Err(HomographyError::NumericalFailure(
            "source and destination point counts differ".into(),
        ));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of the smallest eigenvalue of A^T A.
    let eig = nalgebra::SymmetricEigen::new(a.transpose() * &a);
    let min_idx = (0..9)
        .min_by(|&i, &j| {
            eig.eigenvalues[i]
                .abs()
                .total_cmp(&eig.eigenvalues[j].abs())
        })
        .unwrap_or(0);
    let h_vec: Vec<f64> = (0..9).map(|j| eig.eigenvectors[(j, min_idx)]).collect();
    let h_norm = Matrix3::from_row_slice(&h_vec);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("normalization not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 || !h.iter().all(|v| v.is_finite()) {
        return Err(HomographyError::NumericalFailure("degenerate homography".into()));
    }
    Ok(h / scale)
}

#[derive(Debug, Clone)]
pub struct RansacConfig {
    pub max_iters: usize,
    /// Maximum reprojection error in pixels for an inlier.
    pub inlier_threshold: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            inlier_threshold: 3.0,
            min_inliers: 8,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult {
    pub h: Matrix3<f64>,
    pub n_inliers: usize,
}

/// Fit a homography robust to outlier correspondences.
pub fn fit_homography_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<RansacResult, HomographyError> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: n.min(dst.len()),
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best_inliers = 0usize;
    let mut best_mask = vec![false; n];
    let mut best_h = Matrix3::identity();

    for _ in 0..config.max_iters {
        let sample = rand::seq::index::sample(&mut rng, n, 4);
        let s4: Vec<[f64; 2]> = sample.iter().map(|i| src[i]).collect();
        let d4: Vec<[f64; 2]> = sample.iter().map(|i| dst[i]).collect();

        let h = match estimate_homography_dlt(&s4, &d4) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let mask: Vec<bool> = src
            .iter()
            .zip(dst)
            .map(|(s, d)| reprojection_error(&h, s, d) < config.inlier_threshold)
            .collect();
        let count = mask.iter().filter(|&&m| m).count();

        if count > best_inliers {
            best_inliers = count;
            best_mask = mask;
            best_h = h;
            if count * 10 > n * 9 {
                break;
            }
        }
    }

    if best_inliers < config.min_inliers.max(4) {
        return Err(HomographyError::InsufficientInliers {
            needed: config.min_inliers.max(4),
            found: best_inliers,
        });
    }

    let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
    let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
    let h = estimate_homography_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);
    let n_inliers = src
        .iter()
        .zip(dst)
        .filter(|(s, d)| reprojection_error(&h, s, d) < config.inlier_threshold)
        .count();

    Ok(RansacResult { h, n_inliers })
}
