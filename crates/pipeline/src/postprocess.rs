//! Vector post-processing of polygonized markings.
//!
//! Stages run in order: clean, enrich, simplify, smooth, classify points.
//! Each stage maps a feature collection to a new one.

use geo::{Area, BoundingRect, Buffer, Centroid, ChaikinSmoothing, Geometry, MultiPolygon, Point, Polygon, Simplify};
use geojson::{Feature, FeatureCollection, JsonObject, JsonValue};
use sketchmap_core::colors::ColorCatalogue;
use sketchmap_core::error::CoreError;
use sketchmap_core::types::Bbox;

use crate::projection::{geometry_to_mercator, geometry_to_wgs84};

/// Positive/negative buffer distance as a fraction of the largest diagonal.
pub const BUFFER_FRACTION: f64 = 0.1;
/// Douglas-Peucker tolerance as a fraction of the largest diagonal.
pub const SIMPLIFY_FRACTION: f64 = 0.0025;
pub const SMOOTHING_ITERATIONS: usize = 5;
pub const DEFAULT_POINT_AREA_THRESHOLD: f64 = 0.00047;

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("color value '{0}' is not in the color catalogue")]
    UnknownColor(String),

    #[error("invalid feature geometry: {0}")]
    Geometry(String),
}

impl From<PostProcessError> for CoreError {
    fn from(err: PostProcessError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PostProcessConfig {
    pub catalogue: ColorCatalogue,
    pub point_area_threshold: f64,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            catalogue: ColorCatalogue::default(),
            point_area_threshold: DEFAULT_POINT_AREA_THRESHOLD,
        }
    }
}

/// Run all stages on the features polygonized from one marking raster.
pub fn post_process(
    fc: FeatureCollection,
    name: &str,
    bbox: &Bbox,
    config: &PostProcessConfig,
) -> Result<FeatureCollection, PostProcessError> {
    let fc = clean(fc);
    let fc = enrich(fc, name, &config.catalogue)?;
    let fc = simplify(fc)?;
    let fc = smooth(fc)?;
    classify_points(fc, bbox, config.point_area_threshold)
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn geometry_of(feature: &Feature) -> Result<Option<Geometry<f64>>, PostProcessError> {
    feature
        .geometry
        .as_ref()
        .map(|g| Geometry::<f64>::try_from(g.value.clone()).map_err(|e| PostProcessError::Geometry(e.to_string())))
        .transpose()
}

fn with_geometry(properties: Option<JsonObject>, geometry: &Geometry<f64>) -> Feature {
    Feature {
        geometry: Some(geojson::Geometry::new(geojson::Value::from(geometry))),
        properties,
        ..Feature::default()
    }
}

fn color_of(feature: &Feature) -> Option<&str> {
    feature.property("color").and_then(JsonValue::as_str)
}

fn exterior_only(polygon: &Polygon<f64>) -> Polygon<f64> {
    Polygon::new(polygon.exterior().clone(), Vec::new())
}

// ---------------------------------------------------------------------------
// Clean
// ---------------------------------------------------------------------------

/// Drop background features and the inner rings of every polygon.
pub fn clean(fc: FeatureCollection) -> FeatureCollection {
    let features = fc
        .features
        .into_iter()
        .filter(|f| color_of(f) != Some("0"))
        .map(|mut f| {
            if let Some(geometry) = f.geometry.as_mut() {
                match &mut geometry.value {
                    geojson::Value::Polygon(rings) => rings.truncate(1),
                    geojson::Value::MultiPolygon(polygons) => polygons.iter_mut().for_each(|rings| rings.truncate(1)),
                    _ => {}
                }
            }
            f
        })
        .collect();
    collection(features)
}

// ---------------------------------------------------------------------------
// Enrich
// ---------------------------------------------------------------------------

/// Set `name` to the source file name and replace the color index by its
/// catalogue name.
pub fn enrich(fc: FeatureCollection, name: &str, catalogue: &ColorCatalogue) -> Result<FeatureCollection, PostProcessError> {
    let features = fc
        .features
        .into_iter()
        .map(|mut f| {
            f.set_property("name", name);
            if let Some(raw) = color_of(&f).map(str::to_owned) {
                let color = raw
                    .parse::<u8>()
                    .ok()
                    .and_then(|index| catalogue.name(index))
                    .ok_or(PostProcessError::UnknownColor(raw))?;
                f.set_property("color", color);
            }
            Ok(f)
        })
        .collect::<Result<_, PostProcessError>>()?;
    Ok(collection(features))
}

// ---------------------------------------------------------------------------
// Simplify
// ---------------------------------------------------------------------------

fn diagonal(polygon: &Polygon<f64>) -> f64 {
    polygon
        .bounding_rect()
        .map(|r| r.width().hypot(r.height()))
        .unwrap_or(0.0)
}

fn polygon_parts(geometry: &Geometry<f64>) -> Option<Vec<Polygon<f64>>> {
    match geometry {
        Geometry::Polygon(p) => Some(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => Some(mp.0.clone()),
        _ => None,
    }
}

fn parts_to_geometry(mut parts: Vec<Polygon<f64>>) -> Option<Geometry<f64>> {
    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(parts))),
    }
}

/// Closing of the polygons by `distance`, followed by Douglas-Peucker with
/// tolerance `epsilon`. Inner rings are dropped after the dissolve and
/// again after shrinking.
fn buffer_dissolve_simplify(polygons: &[Polygon<f64>], distance: f64, epsilon: f64) -> Vec<Polygon<f64>> {
    let buffered: Vec<MultiPolygon<f64>> = polygons.iter().map(|p| p.buffer(distance)).collect();
    let dissolved = geo::unary_union(&buffered);
    dissolved
        .iter()
        .map(exterior_only)
        .flat_map(|p| p.buffer(-distance).0)
        .map(|p| exterior_only(&p).simplify(epsilon))
        .filter(|p| p.exterior().0.len() >= 4 && p.unsigned_area() > 0.0)
        .collect()
}

/// Buffer, dissolve and simplify the polygons of each color.
///
/// Buffer distance and tolerance derive from the largest polygon diagonal
/// of the whole input collection, so every color group is treated alike.
pub fn simplify(fc: FeatureCollection) -> Result<FeatureCollection, PostProcessError> {
    let mut groups: Vec<(Option<String>, Vec<(Feature, Vec<Polygon<f64>>)>)> = Vec::new();
    let mut passthrough = Vec::new();

    for feature in fc.features {
        let parts = geometry_of(&feature)?.as_ref().and_then(polygon_parts);
        let Some(parts) = parts else {
            passthrough.push(feature);
            continue;
        };
        let key = color_of(&feature).map(str::to_owned);
        let mercator = parts.iter().map(geometry_to_mercator).collect();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push((feature, mercator)),
            None => groups.push((key, vec![(feature, mercator)])),
        }
    }

    let d_max = groups
        .iter()
        .flat_map(|(_, members)| members.iter().flat_map(|(_, parts)| parts.iter()))
        .map(diagonal)
        .fold(0.0, f64::max);
    let distance = BUFFER_FRACTION * d_max;
    let epsilon = SIMPLIFY_FRACTION * d_max;

    let mut features = Vec::new();
    for (_, members) in groups {
        let properties = members[0].0.properties.clone();
        let polygons: Vec<Polygon<f64>> = members.into_iter().flat_map(|(_, parts)| parts).collect();
        if let Some(geometry) = parts_to_geometry(buffer_dissolve_simplify(&polygons, distance, epsilon)) {
            features.push(with_geometry(properties, &geometry_to_wgs84(&geometry)));
        }
    }

    features.extend(passthrough);
    Ok(collection(features))
}

// ---------------------------------------------------------------------------
// Smooth
// ---------------------------------------------------------------------------

/// Chaikin corner cutting on polygon boundaries.
pub fn smooth(fc: FeatureCollection) -> Result<FeatureCollection, PostProcessError> {
    let features = fc
        .features
        .into_iter()
        .map(|feature| {
            let smoothed = match geometry_of(&feature)? {
                Some(Geometry::Polygon(p)) => Geometry::Polygon(p.chaikin_smoothing(SMOOTHING_ITERATIONS)),
                Some(Geometry::MultiPolygon(mp)) => Geometry::MultiPolygon(mp.chaikin_smoothing(SMOOTHING_ITERATIONS)),
                _ => return Ok(feature),
            };
            Ok(with_geometry(feature.properties, &smoothed))
        })
        .collect::<Result<_, PostProcessError>>()?;
    Ok(collection(features))
}

// ---------------------------------------------------------------------------
// Classify points
// ---------------------------------------------------------------------------

/// Replace polygons smaller than `threshold` times the map frame area by
/// their centroid. Areas are compared in EPSG:3857.
pub fn classify_points(fc: FeatureCollection, bbox: &Bbox, threshold: f64) -> Result<FeatureCollection, PostProcessError> {
    let frame_area = bbox.area();
    let features = fc
        .features
        .into_iter()
        .map(|feature| {
            let mercator = match geometry_of(&feature)? {
                Some(g @ (Geometry::Polygon(_) | Geometry::MultiPolygon(_))) => geometry_to_mercator(&g),
                _ => return Ok(feature),
            };
            if frame_area <= 0.0 || mercator.unsigned_area() / frame_area >= threshold {
                return Ok(feature);
            }
            match mercator.centroid() {
                Some(centroid) => {
                    let point: Point<f64> = geometry_to_wgs84(&centroid);
                    Ok(with_geometry(feature.properties, &Geometry::Point(point)))
                }
                None => Ok(feature),
            }
        })
        .collect::<Result<_, PostProcessError>>()?;
    Ok(collection(features))
}
