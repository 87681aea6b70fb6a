use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Axis-aligned bounding box.
///
/// Holds EPSG:3857 coordinates for map extents, or EPSG:4326 degrees for
/// the `bboxWGS84` form field. Field order follows the QR payload and the
/// WMS `BBOX` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl Bbox {
    /// Build a bbox, rejecting non-finite or inverted coordinates.
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Result<Self, CoreError> {
        let bbox = Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Parse the JSON array form `[lon_min, lat_min, lon_max, lat_max]`.
    pub fn from_json_array(raw: &str) -> Result<Self, CoreError> {
        let values: Vec<f64> = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Invalid bbox '{raw}': {e}")))?;
        match values.as_slice() {
            [a, b, c, d] => Self::new(*a, *b, *c, *d),
            _ => Err(CoreError::Validation(format!(
                "A bbox needs exactly four coordinates, got {}",
                values.len()
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let coords = [self.lon_min, self.lat_min, self.lon_max, self.lat_max];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(CoreError::Validation("Bbox coordinates must be finite".into()));
        }
        if self.lon_min >= self.lon_max || self.lat_min >= self.lat_max {
            return Err(CoreError::Validation(
                "Bbox minimum coordinates must be smaller than maximum coordinates".into(),
            ));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Centre as `(lon, lat)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lon_min + self.lon_max) / 2.0,
            (self.lat_min + self.lat_max) / 2.0,
        )
    }

    /// Comma separated form used by the WMS `BBOX` parameter.
    pub fn to_wms_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.lon_min, self.lat_min, self.lon_max, self.lat_max
        )
    }
}

/// Map frame size in pixels, used for WMS `WIDTH` and `HEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Largest accepted map frame edge in pixels.
pub const MAX_FRAME_EDGE_PX: u32 = 10_000;

impl Size {
    /// Parse the JSON object form `{"width": .., "height": ..}`.
    ///
    /// Fractional values are rounded, as browsers report the print box in
    /// fractional dots.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        #[derive(Deserialize)]
        struct RawSize {
            width: f64,
            height: f64,
        }
        let parsed: RawSize = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Invalid size '{raw}': {e}")))?;
        let to_px = |v: f64| -> Result<u32, CoreError> {
            if !v.is_finite() || v < 1.0 || v > MAX_FRAME_EDGE_PX as f64 {
                return Err(CoreError::Validation(format!(
                    "Map size must be between 1 and {MAX_FRAME_EDGE_PX} pixels, got {v}"
                )));
            }
            Ok(v.round() as u32)
        };
        Ok(Self {
            width: to_px(parsed.width)?,
            height: to_px(parsed.height)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
        }
    }
}

impl std::str::FromStr for Orientation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "landscape" => Ok(Orientation::Landscape),
            "portrait" => Ok(Orientation::Portrait),
            other => Err(CoreError::Validation(format!(
                "'{other}' is not a valid orientation. Allowed values are: landscape, portrait"
            ))),
        }
    }
}
