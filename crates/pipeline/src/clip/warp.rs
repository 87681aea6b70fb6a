//! Perspective warp of the photo onto the template grid.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;

/// Warp `src` into a `width` x `height` canvas where `h` maps source pixels
/// onto canvas pixels. Canvas pixels whose preimage falls outside the
/// source stay black. `None` when `h` is singular.
pub fn warp_perspective(src: &RgbImage, h: &Matrix3<f64>, width: u32, height: u32) -> Option<RgbImage> {
    let matrix: [f32; 9] = std::array::from_fn(|i| h[(i / 3, i % 3)] as f32);
    let projection = Projection::from_matrix(matrix)?;
    let mut out = RgbImage::new(width, height);
    if src.width() > 0 && src.height() > 0 {
        warp_into(src, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
    }
    Some(out)
}
