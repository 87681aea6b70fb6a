//! Printable sketch map: page composition and PDF output.
//!
//! The page holds the base map inside the map margin, a fiducial square
//! outside each map frame corner and a side panel (bottom panel for
//! portrait pages) with the QR code, a scale bar and caption text.

use chrono::NaiveDate;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use sketchmap_core::error::CoreError;
use sketchmap_core::layer::Layer;
use sketchmap_core::paper_format::{cm_to_px, PaperFormat, PRINT_DPI};
use sketchmap_core::qr_payload::QrPayload;
use sketchmap_core::types::{Bbox, Orientation};
use uuid::Uuid;

use crate::pdf::{write_pdf, PdfImage, PdfPage, TextItem};
use crate::projection::mercator_to_wgs84;
use crate::qr::render_payload;
use crate::raster::{encode_jpeg, encode_png};

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const JPEG_QUALITY: u8 = 90;
const SCALE_BAR_SEGMENTS: u32 = 4;

/// Axis-aligned pixel rectangle on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Pixel geometry of a page at [`PRINT_DPI`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub page_width: u32,
    pub page_height: u32,
    pub frame: Rect,
    pub panel: Rect,
    pub marker: u32,
}

impl Layout {
    /// Fit a map frame of aspect ratio `frame_aspect` (width / height).
    pub fn new(format: &PaperFormat, orientation: Orientation, frame_aspect: f64) -> Self {
        let (page_width, page_height) = format.page_px(orientation);
        let margin = cm_to_px(format.map_margin_cm);
        let panel_depth = cm_to_px(format.right_margin_cm);

        let (avail_w, avail_h, panel) = match orientation {
            Orientation::Landscape => (
                page_width.saturating_sub(2 * margin + panel_depth),
                page_height.saturating_sub(2 * margin),
                Rect {
                    x: page_width.saturating_sub(panel_depth),
                    y: margin,
                    width: panel_depth.saturating_sub(margin),
                    height: page_height.saturating_sub(2 * margin),
                },
            ),
            Orientation::Portrait => (
                page_width.saturating_sub(2 * margin),
                page_height.saturating_sub(2 * margin + panel_depth),
                Rect {
                    x: margin,
                    y: page_height.saturating_sub(panel_depth),
                    width: page_width.saturating_sub(2 * margin),
                    height: panel_depth.saturating_sub(margin),
                },
            ),
        };

        let (width, height) = if (avail_w as f64 / avail_h.max(1) as f64) > frame_aspect {
            (((avail_h as f64) * frame_aspect).round() as u32, avail_h)
        } else {
            (avail_w, ((avail_w as f64) / frame_aspect).round() as u32)
        };

        Self {
            page_width,
            page_height,
            frame: Rect {
                x: margin,
                y: margin,
                width: width.max(1),
                height: height.max(1),
            },
            panel,
            marker: cm_to_px(format.marker_scale).max(2),
        }
    }

    /// Top-left corners of the four fiducial squares, clockwise from the
    /// top-left frame corner.
    pub fn marker_positions(&self) -> [(u32, u32); 4] {
        let gap = (self.marker / 2).max(1);
        let offset = self.marker + gap;
        let f = self.frame;
        [
            (f.x.saturating_sub(offset), f.y.saturating_sub(offset)),
            (f.right() + gap, f.y.saturating_sub(offset)),
            (f.right() + gap, f.bottom() + gap),
            (f.x.saturating_sub(offset), f.bottom() + gap),
        ]
    }
}

/// Everything printed on a sketch map.
#[derive(Debug, Clone)]
pub struct SketchMapInput<'a> {
    pub uuid: Uuid,
    pub version: String,
    /// Map extent in EPSG:3857.
    pub bbox: Bbox,
    pub layer: Layer,
    pub format: PaperFormat,
    pub orientation: Orientation,
    /// Scale denominator shown in the caption; ignored when not positive.
    pub scale: f64,
    pub base_map: &'a RgbImage,
    pub attribution: &'a str,
    pub created: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct SketchMap {
    pub pdf: Vec<u8>,
    /// Map frame template as PNG: the unmarked base map.
    pub template: Vec<u8>,
    /// Composed page raster, kept for previews and tests.
    pub page: RgbImage,
}

fn fill_rect(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let x1 = rect.right().min(image.width());
    let y1 = rect.bottom().min(image.height());
    for y in rect.y..y1 {
        for x in rect.x..x1 {
            image.put_pixel(x, y, color);
        }
    }
}

/// Largest 1, 2 or 5 times a power of ten not above `max_m`.
pub fn nice_length(max_m: f64) -> f64 {
    if !(max_m.is_finite() && max_m > 0.0) {
        return 0.0;
    }
    let power = 10f64.powf(max_m.log10().floor());
    [5.0, 2.0, 1.0]
        .into_iter()
        .map(|f| f * power)
        .find(|len| *len <= max_m)
        .unwrap_or(power)
}

/// Ground metres per map frame pixel, corrected for Mercator scale.
pub fn ground_resolution(bbox: &Bbox, frame_width_px: u32) -> f64 {
    let (cx, cy) = bbox.center();
    let (_, lat) = mercator_to_wgs84(cx, cy);
    bbox.width() * lat.to_radians().cos() / frame_width_px.max(1) as f64
}

fn scale_label(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{} km", meters / 1000.0)
    } else {
        format!("{meters} m")
    }
}

/// Draw the alternating scale bar; returns its rectangle and label.
fn draw_scale_bar(
    page: &mut RgbImage,
    origin: (u32, u32),
    max_width: u32,
    height: u32,
    metres_per_px: f64,
) -> Option<(Rect, String)> {
    let length_m = nice_length(max_width as f64 * metres_per_px);
    let width = (length_m / metres_per_px).round() as u32;
    if width < SCALE_BAR_SEGMENTS {
        return None;
    }
    let rect = Rect {
        x: origin.0,
        y: origin.1,
        width,
        height,
    };
    fill_rect(page, rect, BLACK);
    let segment = width / SCALE_BAR_SEGMENTS;
    for i in (1..SCALE_BAR_SEGMENTS).step_by(2) {
        fill_rect(
            page,
            Rect {
                x: rect.x + i * segment,
                y: rect.y + 1,
                width: segment,
                height: height.saturating_sub(2),
            },
            WHITE,
        );
    }
    Some((rect, scale_label(length_m)))
}

fn px_to_pt(px: u32) -> f64 {
    px as f64 * 72.0 / PRINT_DPI
}

fn pt_to_px(pt: f64) -> u32 {
    (pt * PRINT_DPI / 72.0).round() as u32
}

/// Compose the page raster and its caption text.
pub fn compose(input: &SketchMapInput<'_>) -> Result<(RgbImage, Layout, Vec<TextItem>), CoreError> {
    let (bw, bh) = input.base_map.dimensions();
    if bw == 0 || bh == 0 {
        return Err(CoreError::MapGeneration("The base map image is empty.".into()));
    }
    let layout = Layout::new(&input.format, input.orientation, bw as f64 / bh as f64);
    let mut page = RgbImage::from_pixel(layout.page_width, layout.page_height, WHITE);

    let frame = layout.frame;
    let map = image::imageops::resize(input.base_map, frame.width, frame.height, FilterType::Triangle);
    image::imageops::replace(&mut page, &map, frame.x as i64, frame.y as i64);

    for (x, y) in layout.marker_positions() {
        fill_rect(
            &mut page,
            Rect {
                x,
                y,
                width: layout.marker,
                height: layout.marker,
            },
            BLACK,
        );
    }

    let payload = QrPayload {
        version: input.version.clone(),
        uuid: input.uuid,
        bbox: input.bbox,
        layer: input.layer.clone(),
    };
    let panel = layout.panel;
    let qr_edge = cm_to_px(input.format.qr_scale * input.format.right_margin_cm)
        .min(panel.width)
        .min(panel.height);
    let qr_small = render_payload(&payload, 1)?;
    let module_px = (qr_edge / qr_small.width().max(1)).max(1);
    let qr = image::DynamicImage::ImageLuma8(render_payload(&payload, module_px)?).to_rgb8();
    let qr_x = match input.orientation {
        Orientation::Landscape => panel.x,
        Orientation::Portrait => panel.right().saturating_sub(qr.width()),
    };
    image::imageops::replace(&mut page, &qr, qr_x as i64, panel.y as i64);

    let font_pt = input.format.font_size_pt as f64;
    let line_px = pt_to_px(font_pt * 1.2);
    let mut texts = Vec::new();
    let mut cursor_y = match input.orientation {
        Orientation::Landscape => panel.y + qr.height() + line_px,
        Orientation::Portrait => panel.y,
    };

    let bar_height = pt_to_px(input.format.scale_height as f64 / 2.0).max(4);
    let bar_width = match input.orientation {
        Orientation::Landscape => panel.width * 4 / 5,
        Orientation::Portrait => panel.width.saturating_sub(qr.width()) / 3,
    };
    let metres_per_px = ground_resolution(&input.bbox, frame.width);
    if let Some((bar, label)) = draw_scale_bar(&mut page, (panel.x, cursor_y), bar_width, bar_height, metres_per_px) {
        texts.push(TextItem {
            x: px_to_pt(bar.x),
            y: px_to_pt(layout.page_height) - px_to_pt(bar.bottom() + line_px),
            size: font_pt,
            text: label,
        });
        cursor_y = bar.bottom() + 3 * line_px;
    }

    let mut caption = format!("Created: {}", input.created.format("%Y-%m-%d"));
    if input.scale.is_finite() && input.scale > 0.0 {
        caption.push_str(&format!("\nScale 1:{:.0}", input.scale));
    }
    caption.push('\n');
    caption.push_str(input.attribution);
    texts.push(TextItem {
        x: px_to_pt(panel.x),
        y: px_to_pt(layout.page_height) - px_to_pt(cursor_y + line_px),
        size: font_pt,
        text: caption,
    });

    Ok((page, layout, texts))
}

/// Render the PDF and the map frame template.
pub fn render(input: &SketchMapInput<'_>) -> Result<SketchMap, CoreError> {
    let (page, layout, texts) = compose(input)?;
    let jpeg = encode_jpeg(&page, JPEG_QUALITY)?;
    let (width_pt, height_pt) = input.format.page_pt(input.orientation);
    let pdf = write_pdf(&PdfPage {
        width_pt,
        height_pt,
        image: Some(PdfImage {
            jpeg: &jpeg,
            width: layout.page_width,
            height: layout.page_height,
        }),
        rects: Vec::new(),
        texts,
    });
    Ok(SketchMap {
        pdf,
        template: encode_png(input.base_map)?,
        page,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr::read_payload;
    use image::imageops::grayscale;
    use sketchmap_core::paper_format::A4;

    fn bbox() -> Bbox {
        Bbox::new(964472.19, 6343459.03, 967434.6, 6345977.63).unwrap()
    }

    fn base_map() -> RgbImage {
        RgbImage::from_fn(467, 397, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 180]))
    }

    fn input(base_map: &RgbImage, orientation: Orientation) -> SketchMapInput<'_> {
        SketchMapInput {
            uuid: Uuid::parse_str("654dbda4-3e33-4e6e-8f14-1ed3a0f3a6a4").unwrap(),
            version: "2.0.0".into(),
            bbox: bbox(),
            layer: Layer::Osm,
            format: A4,
            orientation,
            scale: 10_000.0,
            base_map,
            attribution: "Powered by OpenStreetMap\n©openstreetmap.org/copyright",
            created: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        }
    }

    // ---------------------------------------------------------------------------
    // Test: layout geometry
    // ---------------------------------------------------------------------------

    #[test]
    fn landscape_frame_leaves_room_for_panel() {
        let layout = Layout::new(&A4, Orientation::Landscape, 1867.0 / 1587.0);
        assert_eq!((layout.page_width, layout.page_height), (1754, 1240));
        assert!(layout.frame.right() <= layout.panel.x);
        assert!(layout.frame.bottom() <= layout.page_height - cm_to_px(1.0));
        let aspect = layout.frame.width as f64 / layout.frame.height as f64;
        assert!((aspect - 1867.0 / 1587.0).abs() < 0.01);
    }

    #[test]
    fn portrait_panel_is_below_frame() {
        let layout = Layout::new(&A4, Orientation::Portrait, 1.0);
        assert!(layout.frame.bottom() <= layout.panel.y);
        assert!(layout.panel.x < layout.frame.right());
    }

    #[test]
    fn markers_sit_outside_frame_corners() {
        let layout = Layout::new(&A4, Orientation::Landscape, 1.2);
        let f = layout.frame;
        for (x, y) in layout.marker_positions() {
            let inside_x = x + layout.marker > f.x && x < f.right();
            let inside_y = y + layout.marker > f.y && y < f.bottom();
            assert!(!(inside_x && inside_y), "marker at ({x},{y}) overlaps the frame");
        }
    }

    #[test]
    fn nice_lengths() {
        assert_eq!(nice_length(740.0), 500.0);
        assert_eq!(nice_length(199.0), 100.0);
        assert_eq!(nice_length(2.5), 2.0);
        assert_eq!(nice_length(0.0), 0.0);
        assert_eq!(scale_label(2000.0), "2 km");
        assert_eq!(scale_label(500.0), "500 m");
    }

    #[test]
    fn ground_resolution_shrinks_with_latitude() {
        // ~49.4 degrees north: cos(lat) ~ 0.65
        let res = ground_resolution(&bbox(), 2962);
        assert!(res > 0.6 && res < 0.7, "{res}");
    }

    // ---------------------------------------------------------------------------
    // Test: composed page
    // ---------------------------------------------------------------------------

    #[test]
    fn page_carries_decodable_qr_code() {
        let base = base_map();
        let input = input(&base, Orientation::Landscape);
        let (page, layout, texts) = compose(&input).unwrap();

        let payload = read_payload(&grayscale(&page)).unwrap();
        assert_eq!(payload.uuid, input.uuid);
        assert_eq!(payload.bbox, bbox());
        assert_eq!(payload.layer, Layer::Osm);

        let (mx, my) = layout.marker_positions()[0];
        assert_eq!(page.get_pixel(mx, my), &BLACK);
        assert!(texts.iter().any(|t| t.text.contains("Created: 2024-05-01")));
        assert!(texts.iter().any(|t| t.text.ends_with(" m") || t.text.ends_with(" km")));
    }

    #[test]
    fn render_produces_pdf_and_template() {
        let base = base_map();
        let map = render(&input(&base, Orientation::Portrait)).unwrap();
        assert!(map.pdf.starts_with(b"%PDF-1.4"));
        let template = image::load_from_memory(&map.template).unwrap().to_rgb8();
        assert_eq!(template, base);
    }

    #[test]
    fn empty_base_map_is_rejected() {
        let base = RgbImage::new(0, 0);
        assert!(render(&input(&base, Orientation::Landscape)).is_err());
    }
}
