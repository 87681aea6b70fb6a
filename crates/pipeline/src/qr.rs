//! QR code rendering for printed sketch maps and decoding from uploads.

use image::imageops::FilterType;
use image::{GrayImage, Luma};
use qrcode::{Color, EcLevel, QrCode};
use sketchmap_core::error::{CoreError, QrCodeError};
use sketchmap_core::qr_payload::QrPayload;

/// Downscale factor between decode attempts.
pub const RETRY_SCALE: f64 = 0.75;

/// Deepest retry; attempts run at `RETRY_SCALE^d` for `d = 0..=MAX_DEPTH`.
pub const MAX_DEPTH: u32 = 5;

/// Quiet zone around rendered codes, in modules.
const QUIET_ZONE: u32 = 4;

#[derive(Debug, PartialEq, Eq)]
enum Attempt {
    Found(String),
    Nothing,
    Multiple,
}

fn decode_once(gray: &GrayImage) -> Attempt {
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        gray.width() as usize,
        gray.height() as usize,
        |x, y| gray.get_pixel(x as u32, y as u32).0[0],
    );
    let mut contents: Vec<String> = prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| grid.decode().ok().map(|(_, text)| text))
        .collect();
    match contents.len() {
        0 => Attempt::Nothing,
        1 => Attempt::Found(contents.remove(0)),
        _ => Attempt::Multiple,
    }
}

/// Raw text of the single QR code on the image.
///
/// When nothing decodes the image is downscaled and retried; finder
/// patterns of large prints often only resolve at a smaller scale.
pub fn read_text(gray: &GrayImage) -> Result<String, QrCodeError> {
    let (w, h) = gray.dimensions();
    for depth in 0..=MAX_DEPTH {
        let scale = RETRY_SCALE.powi(depth as i32);
        let (sw, sh) = ((w as f64 * scale) as u32, (h as f64 * scale) as u32);
        if sw == 0 || sh == 0 {
            break;
        }
        let attempt = if depth == 0 {
            decode_once(gray)
        } else {
            decode_once(&image::imageops::resize(gray, sw, sh, FilterType::Triangle))
        };
        match attempt {
            Attempt::Found(text) => return Ok(text),
            Attempt::Multiple => return Err(QrCodeError::Multiple),
            Attempt::Nothing => tracing::debug!(depth, "no QR code decoded"),
        }
    }
    Err(QrCodeError::NotDetected)
}

/// Decode and parse the sketch map payload of an upload.
pub fn read_payload(gray: &GrayImage) -> Result<QrPayload, QrCodeError> {
    QrPayload::parse(&read_text(gray)?)
}

/// Render `payload` as a QR code with `module_px` pixels per module.
pub fn render_payload(payload: &QrPayload, module_px: u32) -> Result<GrayImage, CoreError> {
    render_text(&payload.encode(), module_px)
}

pub fn render_text(text: &str, module_px: u32) -> Result<GrayImage, CoreError> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::M)
        .map_err(|e| CoreError::Internal(format!("QR code encoding failed: {e}")))?;
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let module_px = module_px.max(1);
    let side = (modules + 2 * QUIET_ZONE) * module_px;

    Ok(GrayImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / module_px, y / module_px);
        let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&mx)
            && (QUIET_ZONE..QUIET_ZONE + modules).contains(&my);
        let dark = inside
            && colors[((my - QUIET_ZONE) * modules + (mx - QUIET_ZONE)) as usize] == Color::Dark;
        Luma([if dark { 0 } else { 255 }])
    }))
}
