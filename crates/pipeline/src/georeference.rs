//! GeoTIFF encoding of map frame rasters in EPSG:3857.
//!
//! The raster is assumed to span its bbox exactly without rotation, so the
//! affine transform is `[lon_min, dx, 0, lat_max, 0, -dy]`.

use std::io::Cursor;

use image::{GrayImage, RgbImage};
use sketchmap_core::error::CoreError;
use sketchmap_core::types::Bbox;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;

const MODEL_PIXEL_SCALE: Tag = Tag::ModelPixelScaleTag;
const MODEL_TIEPOINT: Tag = Tag::ModelTiepointTag;
const GEO_KEY_DIRECTORY: Tag = Tag::GeoKeyDirectoryTag;

pub const EPSG_PSEUDO_MERCATOR: u16 = 3857;

/// GeoKey directory: version 1.1.0 with three keys. Projected model,
/// pixel-is-area raster, projected CRS EPSG:3857.
const GEO_KEYS: [u16; 16] = [
    1, 1, 0, 3, //
    1024, 0, 1, 1, //
    1025, 0, 1, 1, //
    3072, 0, 1, EPSG_PSEUDO_MERCATOR,
];

#[derive(Debug, thiserror::Error)]
pub enum GeoTiffError {
    #[error("raster has no pixels")]
    Empty,

    #[error("pixel buffer has {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },

    #[error("GeoTIFF codec error: {0}")]
    Codec(#[from] tiff::TiffError),

    #[error("unsupported GeoTIFF: {0}")]
    Unsupported(String),
}

impl From<GeoTiffError> for CoreError {
    fn from(err: GeoTiffError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

/// North-up affine transform from pixel to map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_bbox(bbox: &Bbox, width: u32, height: u32) -> Self {
        Self {
            origin_x: bbox.lon_min,
            origin_y: bbox.lat_max,
            pixel_width: bbox.width() / width as f64,
            pixel_height: bbox.height() / height as f64,
        }
    }

    /// Map coordinates of the pixel corner `(x, y)`.
    pub fn pixel_to_map(&self, x: f64, y: f64) -> (f64, f64) {
        (self.origin_x + x * self.pixel_width, self.origin_y - y * self.pixel_height)
    }

    /// GDAL ordering `[x0, dx, 0, y0, 0, -dy]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.origin_x, self.pixel_width, 0.0, self.origin_y, 0.0, -self.pixel_height]
    }
}

/// A decoded GeoTIFF: interleaved 8-bit samples plus georeferencing.
#[derive(Debug, Clone)]
pub struct GeoRaster {
    pub width: u32,
    pub height: u32,
    pub bands: u16,
    pub data: Vec<u8>,
    pub transform: GeoTransform,
    pub epsg: Option<u16>,
}

impl GeoRaster {
    pub fn value(&self, x: u32, y: u32, band: u16) -> u8 {
        self.data[((y * self.width + x) * self.bands as u32 + band as u32) as usize]
    }
}

fn write_geotiff<C>(width: u32, height: u32, data: &[u8], bbox: &Bbox) -> Result<Vec<u8>, GeoTiffError>
where
    C: colortype::ColorType<Inner = u8>,
{
    if width == 0 || height == 0 {
        return Err(GeoTiffError::Empty);
    }
    let transform = GeoTransform::from_bbox(bbox, width, height);
    let mut buf = Vec::new();
    {
        let mut encoder = TiffEncoder::new(Cursor::new(&mut buf))?;
        let mut image = encoder.new_image::<C>(width, height)?;
        image
            .encoder()
            .write_tag(MODEL_PIXEL_SCALE, &[transform.pixel_width, transform.pixel_height, 0.0][..])?;
        image.encoder().write_tag(
            MODEL_TIEPOINT,
            &[0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0][..],
        )?;
        image.encoder().write_tag(GEO_KEY_DIRECTORY, &GEO_KEYS[..])?;
        image.write_data(data)?;
    }
    Ok(buf)
}

/// Three band GeoTIFF from an RGB raster.
pub fn georeference_rgb(image: &RgbImage, bbox: &Bbox) -> Result<Vec<u8>, GeoTiffError> {
    write_geotiff::<colortype::RGB8>(image.width(), image.height(), image.as_raw(), bbox)
}

/// Three band GeoTIFF from interleaved BGR samples; bands are written in
/// RGB order.
pub fn georeference_bgr(data: &[u8], width: u32, height: u32, bbox: &Bbox) -> Result<Vec<u8>, GeoTiffError> {
    let expected = width as usize * height as usize * 3;
    if data.len() != expected {
        return Err(GeoTiffError::BufferSize {
            expected,
            got: data.len(),
        });
    }
    let rgb: Vec<u8> = data
        .chunks_exact(3)
        .flat_map(|p| [p[2], p[1], p[0]])
        .collect();
    write_geotiff::<colortype::RGB8>(width, height, &rgb, bbox)
}

/// Single band GeoTIFF, e.g. a marking raster of color indices.
pub fn georeference_gray(image: &GrayImage, bbox: &Bbox) -> Result<Vec<u8>, GeoTiffError> {
    write_geotiff::<colortype::Gray8>(image.width(), image.height(), image.as_raw(), bbox)
}

/// Decode an 8-bit GeoTIFF written by this module or a compatible writer.
pub fn read_geotiff(bytes: &[u8]) -> Result<GeoRaster, GeoTiffError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions()?;
    let bands = match decoder.colortype()? {
        ColorType::Gray(8) => 1,
        ColorType::RGB(8) => 3,
        other => return Err(GeoTiffError::Unsupported(format!("color type {other:?}"))),
    };

    let scale = decoder.get_tag_f64_vec(MODEL_PIXEL_SCALE)?;
    let tiepoint = decoder.get_tag_f64_vec(MODEL_TIEPOINT)?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(GeoTiffError::Unsupported("incomplete georeferencing tags".into()));
    }
    let transform = GeoTransform {
        origin_x: tiepoint[3] - tiepoint[0] * scale[0],
        origin_y: tiepoint[4] + tiepoint[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: scale[1],
    };
    let epsg = decoder
        .find_tag(GEO_KEY_DIRECTORY)?
        .map(|value| value.into_u32_vec())
        .transpose()?
        .and_then(|keys| projected_epsg(&keys));

    let data = match decoder.read_image()? {
        DecodingResult::U8(data) => data,
        _ => return Err(GeoTiffError::Unsupported("sample format is not 8-bit".into())),
    };

    Ok(GeoRaster {
        width,
        height,
        bands,
        data,
        transform,
        epsg,
    })
}

fn projected_epsg(keys: &[u32]) -> Option<u16> {
    let count = *keys.get(3)? as usize;
    keys[4..]
        .chunks_exact(4)
        .take(count)
        .find(|entry| entry[0] == 3072 && entry[1] == 0)
        .and_then(|entry| u16::try_from(entry[3]).ok())
}
