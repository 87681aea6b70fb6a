//! Request result types and task kinds.
//!
//! A request uuid maps each [`RequestType`] it produced to one task id.
//! Tasks are typed by a kind string stored with each task row.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::layer::Layer;
use crate::types::{Bbox, Orientation, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestType {
    SketchMap,
    QualityReport,
    VectorResults,
    RasterResults,
}

pub const ALL_REQUEST_TYPES: [RequestType; 4] = [
    RequestType::SketchMap,
    RequestType::QualityReport,
    RequestType::VectorResults,
    RequestType::RasterResults,
];

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::SketchMap => "sketch-map",
            RequestType::QualityReport => "quality-report",
            RequestType::VectorResults => "vector-results",
            RequestType::RasterResults => "raster-results",
        }
    }

    /// MIME type of the downloadable result.
    pub fn content_type(self) -> &'static str {
        match self {
            RequestType::SketchMap | RequestType::QualityReport => "application/pdf",
            RequestType::VectorResults => "application/geo+json",
            RequestType::RasterResults => "application/zip",
        }
    }

    /// File name offered for download.
    pub fn download_name(self) -> &'static str {
        match self {
            RequestType::SketchMap => "sketch-map.pdf",
            RequestType::QualityReport => "quality-report.pdf",
            RequestType::VectorResults => "vector-results.geojson",
            RequestType::RasterResults => "raster-results.zip",
        }
    }
}

impl std::str::FromStr for RequestType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_REQUEST_TYPES
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = ALL_REQUEST_TYPES.iter().map(|t| t.as_str()).collect();
                CoreError::Validation(format!(
                    "{s} is not a valid value for the request parameter 'type'. Allowed values are: {}",
                    allowed.join(", ")
                ))
            })
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task kinds
// ---------------------------------------------------------------------------

/// Render the printable sketch map PDF and store the map frame template.
pub const TASK_SKETCH_MAP: &str = "sketch-map";

/// Fetch the OSM quality report and render it as PDF.
pub const TASK_QUALITY_REPORT: &str = "quality-report";

/// Group parent: merge per-file vector results into one GeoJSON.
pub const TASK_VECTOR_MERGE: &str = "vector-merge";

/// Group parent: bundle per-file GeoTIFFs into a zip archive.
pub const TASK_RASTER_BUNDLE: &str = "raster-bundle";

/// Group child: digitize one uploaded file into features.
pub const TASK_VECTOR_FILE: &str = "vector-file";

/// Group child: clip and georeference one uploaded file.
pub const TASK_RASTER_FILE: &str = "raster-file";

pub const ALL_TASK_KINDS: [&str; 6] = [
    TASK_SKETCH_MAP,
    TASK_QUALITY_REPORT,
    TASK_VECTOR_MERGE,
    TASK_RASTER_BUNDLE,
    TASK_VECTOR_FILE,
    TASK_RASTER_FILE,
];

/// Arguments of a group child task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTaskArgs {
    pub file_id: i64,
}

/// Arguments of a [`TASK_SKETCH_MAP`] task, validated by the create form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchMapArgs {
    /// Request uuid; becomes the map frame uuid and the QR uuid.
    pub uuid: Uuid,
    /// Map extent in EPSG:3857.
    pub bbox: Bbox,
    pub bbox_wgs84: Bbox,
    /// Lower-case paper format name.
    pub format: String,
    pub orientation: Orientation,
    pub size: Size,
    pub scale: f64,
    pub layer: Layer,
}

/// Arguments of a [`TASK_QUALITY_REPORT`] task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReportArgs {
    pub bbox_wgs84: Bbox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_type_round_trip_via_str() {
        for t in ALL_REQUEST_TYPES {
            assert_eq!(t.as_str().parse::<RequestType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_type_lists_allowed_values() {
        let err = "digitized-data".parse::<RequestType>().unwrap_err();
        assert!(err.to_string().contains("vector-results"));
    }

    #[test]
    fn sketch_map_args_round_trip_via_json() {
        let args = SketchMapArgs {
            uuid: Uuid::new_v4(),
            bbox: Bbox::new(964472.19, 6343459.03, 967434.6, 6345977.63).unwrap(),
            bbox_wgs84: Bbox::new(8.66, 49.38, 8.69, 49.40).unwrap(),
            format: "a4".into(),
            orientation: Orientation::Landscape,
            size: Size { width: 1867, height: 1587 },
            scale: 11545.0,
            layer: Layer::OpenAerialMap("abc".into()),
        };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["layer"], "oam:abc");
        assert_eq!(json["orientation"], "landscape");
        let back: SketchMapArgs = serde_json::from_value(json).unwrap();
        assert_eq!(back, args);
    }

    #[test]
    fn serde_names_match_path_names() {
        let json = serde_json::to_string(&RequestType::RasterResults).unwrap();
        assert_eq!(json, "\"raster-results\"");
    }
}
