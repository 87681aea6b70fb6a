//! Binary mask morphology. Masks use 0 for background and 255 for
//! foreground.

use std::collections::HashSet;

use image::{GrayImage, Luma};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};
use imageproc::region_labelling::{connected_components, Connectivity};

pub const FOREGROUND: u8 = 255;

/// Fraction of the bbox edge used as structuring element size.
pub const KERNEL_FRACTION: f64 = 0.05;

/// Largest structuring element edge a mask can carry.
const MAX_KERNEL: u32 = 511;

/// Rectangular structuring element size for a marking bbox.
pub fn kernel_for_bbox(bbox_width: f32, bbox_height: f32) -> (u32, u32) {
    let side = |len: f32| ((KERNEL_FRACTION * len as f64).round() as u32).clamp(1, MAX_KERNEL);
    (side(bbox_width), side(bbox_height))
}

/// `kw` x `kh` rectangle with its anchor at `(ax, ay)`.
fn rectangle(kw: u32, kh: u32, ax: u32, ay: u32) -> Mask {
    let shape = GrayImage::from_pixel(kw, kh, Luma([FOREGROUND]));
    Mask::from_image(&shape, ax as u8, ay as u8)
}

/// Closing by a `kw` x `kh` rectangle anchored at its centre. Erosion uses
/// the reflected rectangle so the result always contains the input; the
/// border counts as foreground.
pub fn close(mask: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    let (kw, kh) = (kw.clamp(1, MAX_KERNEL), kh.clamp(1, MAX_KERNEL));
    let anchored = rectangle(kw, kh, kw / 2, kh / 2);
    let reflected = rectangle(kw, kh, kw - 1 - kw / 2, kh - 1 - kh / 2);
    grayscale_erode(&grayscale_dilate(mask, &anchored), &reflected)
}

/// Fill every background region that is not 4-connected to the image
/// border, leaving only the outer contours of each component.
pub fn fill_holes(mask: &GrayImage) -> GrayImage {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return mask.clone();
    }
    let background = GrayImage::from_fn(w, h, |x, y| {
        Luma([if mask.get_pixel(x, y).0[0] == 0 { 0 } else { FOREGROUND }])
    });
    let labels = connected_components(&background, Connectivity::Four, Luma([FOREGROUND]));

    let mut outside = HashSet::new();
    for x in 0..w {
        outside.insert(labels.get_pixel(x, 0).0[0]);
        outside.insert(labels.get_pixel(x, h - 1).0[0]);
    }
    for y in 0..h {
        outside.insert(labels.get_pixel(0, y).0[0]);
        outside.insert(labels.get_pixel(w - 1, y).0[0]);
    }
    outside.remove(&0);

    GrayImage::from_fn(w, h, |x, y| {
        Luma([if outside.contains(&labels.get_pixel(x, y).0[0]) { 0 } else { FOREGROUND }])
    })
}

/// Closing followed by hole filling, sized from the marking's bbox.
pub fn clean_mask(mask: &GrayImage, bbox_width: f32, bbox_height: f32) -> GrayImage {
    let (kw, kh) = kernel_for_bbox(bbox_width, bbox_height);
    fill_holes(&close(mask, kw, kh))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] == FOREGROUND).count()
    }

    #[test]
    fn kernel_is_five_percent_of_bbox() {
        assert_eq!(kernel_for_bbox(100.0, 40.0), (5, 2));
        assert_eq!(kernel_for_bbox(4.0, 4.0), (1, 1));
    }

    #[test]
    fn closing_bridges_small_gaps() {
        let mut mask = GrayImage::new(20, 5);
        for x in (2..18).filter(|&x| x != 9) {
            mask.put_pixel(x, 2, Luma([FOREGROUND]));
        }
        let closed = close(&mask, 3, 1);
        assert_eq!(closed.get_pixel(9, 2).0[0], FOREGROUND);
        assert_eq!(count(&closed), 16);
    }

    #[test]
    fn closing_is_extensive() {
        let mut mask = GrayImage::new(12, 12);
        mask.put_pixel(0, 0, Luma([FOREGROUND]));
        mask.put_pixel(6, 7, Luma([FOREGROUND]));
        let closed = close(&mask, 4, 4);
        assert_eq!(closed.get_pixel(0, 0).0[0], FOREGROUND);
        assert_eq!(closed.get_pixel(6, 7).0[0], FOREGROUND);
    }

    #[test]
    fn closing_with_even_kernel_keeps_every_pixel() {
        let mut mask = GrayImage::new(16, 16);
        for (x, y) in [(3, 4), (8, 8), (15, 15), (9, 0)] {
            mask.put_pixel(x, y, Luma([FOREGROUND]));
        }
        let closed = close(&mask, 4, 2);
        for p in mask.enumerate_pixels().filter(|(_, _, p)| p.0[0] == FOREGROUND) {
            assert_eq!(closed.get_pixel(p.0, p.1).0[0], FOREGROUND, "({},{})", p.0, p.1);
        }
    }

    #[test]
    fn holes_are_filled_but_open_regions_are_not() {
        let mut mask = GrayImage::new(10, 10);
        for i in 2..8 {
            for (x, y) in [(i, 2), (i, 7), (2, i), (7, i)] {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        let filled = fill_holes(&mask);
        assert_eq!(filled.get_pixel(4, 4).0[0], FOREGROUND);
        assert_eq!(filled.get_pixel(0, 0).0[0], 0);
        assert_eq!(count(&filled), 36);
    }

    #[test]
    fn hole_touching_the_border_stays_open() {
        let mut mask = GrayImage::new(8, 8);
        for i in 0..6 {
            for (x, y) in [(i, 5), (5, i)] {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        let filled = fill_holes(&mask);
        assert_eq!(filled, mask);
    }

    #[test]
    fn clean_mask_closes_then_fills() {
        let mut mask = GrayImage::new(40, 40);
        for i in 10..30 {
            for (x, y) in [(i, 10), (i, 29), (10, i), (29, i)] {
                if i != 20 {
                    mask.put_pixel(x, y, Luma([FOREGROUND]));
                }
            }
        }
        let cleaned = clean_mask(&mask, 60.0, 60.0);
        assert_eq!(cleaned.get_pixel(20, 20).0[0], FOREGROUND);
        assert_eq!(cleaned.get_pixel(5, 5).0[0], 0);
    }
}
