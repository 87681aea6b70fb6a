//! Raster to polygon conversion.
//!
//! Every maximal 4-connected region of equal value becomes one polygon.
//! Rings follow pixel edges; exterior rings are counter-clockwise and holes
//! clockwise once the y axis points north.

use std::collections::HashMap;

use geo::{Coord, LineString, Polygon};
use geojson::{Feature, FeatureCollection, JsonObject};
use sketchmap_core::error::CoreError;

use crate::georeference::{read_geotiff, GeoRaster, GeoTiffError, EPSG_PSEUDO_MERCATOR};
use crate::projection::geometry_to_wgs84;

#[derive(Debug, thiserror::Error)]
pub enum PolygonizeError {
    #[error(transparent)]
    GeoTiff(#[from] GeoTiffError),

    #[error("expected a single band raster, got {0} bands")]
    Bands(u16),

    #[error("raster CRS must be EPSG:3857, got {0:?}")]
    Crs(Option<u16>),
}

impl From<PolygonizeError> for CoreError {
    fn from(err: PolygonizeError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

type Vertex = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: Vertex,
    to: Vertex,
}

impl Edge {
    fn direction(&self) -> Vertex {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// Label 4-connected components of equal value. Returns the label per
/// pixel and the value of each label, labels numbered in scan order.
fn label_components(values: &[u8], width: usize, height: usize) -> (Vec<u32>, Vec<u8>) {
    const UNLABELED: u32 = u32::MAX;
    let mut labels = vec![UNLABELED; values.len()];
    let mut label_values = Vec::new();
    let mut stack = Vec::new();

    for start in 0..values.len() {
        if labels[start] != UNLABELED {
            continue;
        }
        let label = label_values.len() as u32;
        let value = values[start];
        label_values.push(value);
        labels[start] = label;
        stack.push(start);
        while let Some(i) = stack.pop() {
            let (x, y) = (i % width, i / width);
            let mut visit = |j: usize| {
                if labels[j] == UNLABELED && values[j] == value {
                    labels[j] = label;
                    stack.push(j);
                }
            };
            if x > 0 {
                visit(i - 1);
            }
            if x + 1 < width {
                visit(i + 1);
            }
            if y > 0 {
                visit(i - width);
            }
            if y + 1 < height {
                visit(i + width);
            }
        }
    }
    (labels, label_values)
}

/// Directed boundary edges of every component. Drawn with y pointing down,
/// the component lies to the left of each edge.
fn boundary_edges(labels: &[u32], width: usize, height: usize, n_labels: usize) -> Vec<Vec<Edge>> {
    let mut edges = vec![Vec::new(); n_labels];
    let same = |x: i64, y: i64, label: u32| {
        x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height && labels[y as usize * width + x as usize] == label
    };
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let label = labels[y as usize * width + x as usize];
            let component = &mut edges[label as usize];
            if !same(x, y - 1, label) {
                component.push(Edge {
                    from: (x + 1, y),
                    to: (x, y),
                });
            }
            if !same(x - 1, y, label) {
                component.push(Edge {
                    from: (x, y),
                    to: (x, y + 1),
                });
            }
            if !same(x, y + 1, label) {
                component.push(Edge {
                    from: (x, y + 1),
                    to: (x + 1, y + 1),
                });
            }
            if !same(x + 1, y, label) {
                component.push(Edge {
                    from: (x + 1, y + 1),
                    to: (x + 1, y),
                });
            }
        }
    }
    edges
}

/// Chain edges into closed rings. Where a component touches itself
/// diagonally the walk crosses over to the diagonal pixel, so the two
/// non-member pixels at that vertex end up on different rings.
fn trace_rings(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::with_capacity(edges.len());
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.from).or_default().push(i);
    }

    let successor = |i: usize| -> Option<usize> {
        let edge = edges[i];
        let candidates = outgoing.get(&edge.to)?;
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }
        let (dx, dy) = edge.direction();
        let outward = (-dy, dx);
        candidates
            .iter()
            .copied()
            .find(|&j| edges[j].direction() == outward)
            .or_else(|| candidates.first().copied())
    };

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();
    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        let mut ring = vec![edges[first].from];
        let mut current = first;
        loop {
            used[current] = true;
            ring.push(edges[current].to);
            match successor(current) {
                Some(next) if next != first && !used[next] => current = next,
                _ => break,
            }
        }
        rings.push(simplify_collinear(ring));
    }
    rings
}

/// Drop vertices in the middle of straight runs. The ring stays closed.
fn simplify_collinear(ring: Vec<Vertex>) -> Vec<Vertex> {
    let open = &ring[..ring.len() - 1];
    let n = open.len();
    let mut out: Vec<Vertex> = (0..n)
        .filter(|&i| {
            let prev = open[(i + n - 1) % n];
            let cur = open[i];
            let next = open[(i + 1) % n];
            (cur.0 - prev.0) * (next.1 - cur.1) != (cur.1 - prev.1) * (next.0 - cur.0)
        })
        .map(|i| open[i])
        .collect();
    if let Some(&first) = out.first() {
        out.push(first);
    }
    out
}

/// Twice the signed area in pixel space (y down). Exterior rings are
/// negative.
fn signed_area2(ring: &[Vertex]) -> i64 {
    ring.windows(2).map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1).sum()
}

/// Polygonize a single band raster in its own CRS. Regions are returned in
/// scan order of their first pixel.
pub fn polygonize(raster: &GeoRaster) -> Result<Vec<(u8, Polygon<f64>)>, PolygonizeError> {
    if raster.bands != 1 {
        return Err(PolygonizeError::Bands(raster.bands));
    }
    let (width, height) = (raster.width as usize, raster.height as usize);
    let (labels, label_values) = label_components(&raster.data, width, height);
    let edges = boundary_edges(&labels, width, height, label_values.len());

    let to_map = |v: &Vertex| {
        let (x, y) = raster.transform.pixel_to_map(v.0 as f64, v.1 as f64);
        Coord { x, y }
    };

    let mut polygons = Vec::with_capacity(label_values.len());
    for (label, component_edges) in edges.iter().enumerate() {
        let mut exterior = None;
        let mut holes = Vec::new();
        for ring in trace_rings(component_edges) {
            if ring.len() < 4 {
                continue;
            }
            let line: LineString<f64> = ring.iter().map(to_map).collect();
            if signed_area2(&ring) < 0 && exterior.is_none() {
                exterior = Some(line);
            } else {
                holes.push(line);
            }
        }
        if let Some(exterior) = exterior {
            polygons.push((label_values[label], Polygon::new(exterior, holes)));
        }
    }
    Ok(polygons)
}

/// Polygonize a single band EPSG:3857 GeoTIFF into WGS 84 features with a
/// `color` property holding the stringified pixel value.
pub fn polygonize_geotiff(bytes: &[u8]) -> Result<FeatureCollection, PolygonizeError> {
    let raster = read_geotiff(bytes)?;
    if raster.epsg != Some(EPSG_PSEUDO_MERCATOR) {
        return Err(PolygonizeError::Crs(raster.epsg));
    }
    let features = polygonize(&raster)?
        .into_iter()
        .map(|(value, polygon)| {
            let mut properties = JsonObject::new();
            properties.insert("color".into(), value.to_string().into());
            Feature {
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&geometry_to_wgs84(&polygon)))),
                properties: Some(properties),
                ..Feature::default()
            }
        })
        .collect();
    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}
