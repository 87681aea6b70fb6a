//! Merge per-file feature collections into one layered collection.

use geojson::{FeatureCollection, JsonObject, JsonValue};
use sketchmap_core::colors::ColorCatalogue;

/// Foreign member listing the layer (color) names in order.
pub const LAYERS_MEMBER: &str = "layers";

/// Foreign member of a per-file collection naming its upload.
pub const SOURCE_MEMBER: &str = "name";

/// Source name of a per-file collection, if it carries one.
pub fn source_name(fc: &FeatureCollection) -> Option<&str> {
    fc.foreign_members.as_ref()?.get(SOURCE_MEMBER)?.as_str()
}

/// Combine feature collections into one, grouping features into one layer
/// per color in catalogue order. Colors outside the catalogue follow in
/// order of first appearance. Feature properties, including the source
/// `name`, are kept as they are.
///
/// A collection without features adds an empty layer named after its
/// upload, so every processed file shows up in `layers`.
pub fn merge(collections: Vec<FeatureCollection>, catalogue: &ColorCatalogue) -> FeatureCollection {
    let mut layers: Vec<(String, Vec<geojson::Feature>)> = catalogue
        .names()
        .iter()
        .map(|name| (name.clone(), Vec::new()))
        .collect();
    let mut unlisted: Vec<(String, Vec<geojson::Feature>)> = Vec::new();
    let mut empty: Vec<String> = Vec::new();

    for (i, fc) in collections.iter().enumerate() {
        if fc.features.is_empty() {
            let name = source_name(fc).map_or_else(|| format!("upload-{}", i + 1), str::to_owned);
            if !empty.contains(&name) {
                empty.push(name);
            }
        }
    }

    for feature in collections.into_iter().flat_map(|fc| fc.features) {
        let color = feature
            .property("color")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_owned();
        match catalogue.position(&color) {
            Some(i) => layers[i].1.push(feature),
            None => match unlisted.iter_mut().find(|(name, _)| *name == color) {
                Some((_, features)) => features.push(feature),
                None => unlisted.push((color, vec![feature])),
            },
        }
    }

    let (mut names, features): (Vec<String>, Vec<Vec<geojson::Feature>>) = layers
        .into_iter()
        .chain(unlisted)
        .filter(|(_, features)| !features.is_empty())
        .unzip();
    names.extend(empty);

    let mut foreign_members = JsonObject::new();
    foreign_members.insert(LAYERS_MEMBER.into(), names.into());
    FeatureCollection {
        bbox: None,
        features: features.into_iter().flatten().collect(),
        foreign_members: Some(foreign_members),
    }
}
