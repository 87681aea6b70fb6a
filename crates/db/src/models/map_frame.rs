//! Map frame templates stored by the create flow.

use serde::Serialize;
use sketchmap_core::error::CoreError;
use sketchmap_core::types::{Bbox, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `map_frame` table.
///
/// `file` and `bbox` are nulled by cleanup; the remaining metadata stays.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MapFrame {
    pub uuid: Uuid,
    #[serde(skip)]
    pub file: Option<Vec<u8>>,
    pub bbox: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub format: String,
    pub orientation: String,
    pub layer: String,
    pub version: String,
    pub ts: Timestamp,
}

impl MapFrame {
    /// Parse the stored bbox (JSON array in EPSG:3857).
    pub fn parsed_bbox(&self) -> Option<Result<Bbox, CoreError>> {
        self.bbox.as_deref().map(Bbox::from_json_array)
    }
}

/// DTO for inserting a map frame. The template and bbox are written
/// together and never updated afterwards.
#[derive(Debug, Clone)]
pub struct NewMapFrame {
    pub uuid: Uuid,
    pub file: Vec<u8>,
    pub bbox: Bbox,
    pub lat: f64,
    pub lon: f64,
    pub format: String,
    pub orientation: String,
    pub layer: String,
    pub version: String,
}

impl NewMapFrame {
    pub fn bbox_text(&self) -> String {
        format!(
            "[{},{},{},{}]",
            self.bbox.lon_min, self.bbox.lat_min, self.bbox.lon_max, self.bbox.lat_max
        )
    }
}
