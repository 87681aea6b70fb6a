//! Read-only catalogue of printable paper formats.
//!
//! All lengths are in centimetres for the landscape orientation; portrait
//! pages swap width and height.

use serde::Serialize;

use crate::error::CoreError;
use crate::types::Orientation;

/// Print resolution used when composing sketch map pages.
pub const PRINT_DPI: f64 = 150.0;

const CM_PER_INCH: f64 = 2.54;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaperFormat {
    pub name: &'static str,
    pub width_cm: f64,
    pub height_cm: f64,
    /// Margin reserved for the QR code, scale bar and text.
    pub right_margin_cm: f64,
    /// Blank margin around the map frame.
    pub map_margin_cm: f64,
    pub font_size_pt: u32,
    /// QR code edge length relative to the margin width.
    pub qr_scale: f64,
    /// Fiducial marker edge length in centimetres.
    pub marker_scale: f64,
    /// Scale bar height in points.
    pub scale_height: u32,
}

pub const A0: PaperFormat = PaperFormat {
    name: "a0",
    width_cm: 118.9,
    height_cm: 84.1,
    right_margin_cm: 15.0,
    map_margin_cm: 1.0,
    font_size_pt: 25,
    qr_scale: 1.8,
    marker_scale: 0.5,
    scale_height: 36,
};

pub const A1: PaperFormat = PaperFormat {
    name: "a1",
    width_cm: 84.1,
    height_cm: 59.4,
    right_margin_cm: 12.0,
    map_margin_cm: 1.0,
    font_size_pt: 20,
    qr_scale: 1.4,
    marker_scale: 0.375,
    scale_height: 24,
};

pub const A2: PaperFormat = PaperFormat {
    name: "a2",
    width_cm: 59.4,
    height_cm: 42.0,
    right_margin_cm: 7.5,
    map_margin_cm: 1.0,
    font_size_pt: 12,
    qr_scale: 0.85,
    marker_scale: 0.25,
    scale_height: 12,
};

pub const A3: PaperFormat = PaperFormat {
    name: "a3",
    width_cm: 42.0,
    height_cm: 29.7,
    right_margin_cm: 7.0,
    map_margin_cm: 1.0,
    font_size_pt: 11,
    qr_scale: 0.80,
    marker_scale: 0.165,
    scale_height: 12,
};

pub const A4: PaperFormat = PaperFormat {
    name: "a4",
    width_cm: 29.7,
    height_cm: 21.0,
    right_margin_cm: 5.0,
    map_margin_cm: 1.0,
    font_size_pt: 8,
    qr_scale: 0.6,
    marker_scale: 0.125,
    scale_height: 12,
};

pub const TABLOID: PaperFormat = PaperFormat {
    name: "tabloid",
    width_cm: 43.2,
    height_cm: 27.9,
    right_margin_cm: 7.0,
    map_margin_cm: 1.0,
    font_size_pt: 11,
    qr_scale: 0.75,
    marker_scale: 0.165,
    scale_height: 12,
};

pub const LETTER: PaperFormat = PaperFormat {
    name: "letter",
    width_cm: 27.9,
    height_cm: 21.6,
    right_margin_cm: 5.0,
    map_margin_cm: 1.0,
    font_size_pt: 8,
    qr_scale: 0.55,
    marker_scale: 0.125,
    scale_height: 12,
};

pub const ALL_PAPER_FORMATS: [PaperFormat; 7] = [A0, A1, A2, A3, A4, TABLOID, LETTER];

/// Convert centimetres to pixels at [`PRINT_DPI`].
pub fn cm_to_px(cm: f64) -> u32 {
    (cm / CM_PER_INCH * PRINT_DPI).round() as u32
}

impl PaperFormat {
    /// Look up a format by its case-insensitive name.
    pub fn by_name(name: &str) -> Result<Self, CoreError> {
        let wanted = name.trim().to_ascii_lowercase();
        ALL_PAPER_FORMATS
            .iter()
            .find(|f| f.name == wanted)
            .copied()
            .ok_or_else(|| {
                let names: Vec<&str> = ALL_PAPER_FORMATS.iter().map(|f| f.name).collect();
                CoreError::Validation(format!(
                    "'{name}' is not a supported paper format. Allowed values are: {}",
                    names.join(", ")
                ))
            })
    }

    /// Page size `(width, height)` in centimetres for an orientation.
    pub fn page_cm(&self, orientation: Orientation) -> (f64, f64) {
        match orientation {
            Orientation::Landscape => (self.width_cm, self.height_cm),
            Orientation::Portrait => (self.height_cm, self.width_cm),
        }
    }

    /// Page size `(width, height)` in pixels at [`PRINT_DPI`].
    pub fn page_px(&self, orientation: Orientation) -> (u32, u32) {
        let (w, h) = self.page_cm(orientation);
        (cm_to_px(w), cm_to_px(h))
    }

    /// Page size in PDF points (1/72 inch).
    pub fn page_pt(&self, orientation: Orientation) -> (f64, f64) {
        let (w, h) = self.page_cm(orientation);
        (w / CM_PER_INCH * 72.0, h / CM_PER_INCH * 72.0)
    }
}
