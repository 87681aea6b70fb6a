//! Base map identity of a sketch map.
//!
//! The layer decides where the base map is fetched from, which marking
//! detection weights are used, and which attribution is printed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Prefix of OpenAerialMap layer identities (`oam:<item id>`).
pub const OAM_PREFIX: &str = "oam:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Osm,
    EsriWorldImagery,
    EsriWorldImageryFallback,
    /// An OpenAerialMap item, identified by its item id.
    OpenAerialMap(String),
}

/// Which trained weight family applies to a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightFamily {
    Osm,
    Esri,
}

impl Layer {
    pub fn as_string(&self) -> String {
        match self {
            Layer::Osm => "osm".into(),
            Layer::EsriWorldImagery => "esri-world-imagery".into(),
            Layer::EsriWorldImageryFallback => "esri-world-imagery-fallback".into(),
            Layer::OpenAerialMap(id) => format!("{OAM_PREFIX}{id}"),
        }
    }

    /// Aerial imagery layers share the Esri weights.
    pub fn weight_family(&self) -> WeightFamily {
        match self {
            Layer::Osm => WeightFamily::Osm,
            _ => WeightFamily::Esri,
        }
    }

    /// Attribution text for layers whose attribution is static.
    ///
    /// OpenAerialMap attributions depend on item metadata and return `None`.
    pub fn static_attribution(&self) -> Option<&'static str> {
        match self {
            Layer::Osm => Some("Powered by OpenStreetMap\n©openstreetmap.org/copyright"),
            Layer::EsriWorldImagery | Layer::EsriWorldImageryFallback => Some(
                "Powered by Esri\nEsri, Maxar, Earthstar Geographics, and the GIS User Community",
            ),
            Layer::OpenAerialMap(_) => None,
        }
    }
}

impl std::str::FromStr for Layer {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "osm" => Ok(Layer::Osm),
            "esri-world-imagery" => Ok(Layer::EsriWorldImagery),
            "esri-world-imagery-fallback" => Ok(Layer::EsriWorldImageryFallback),
            other => match other.strip_prefix(OAM_PREFIX) {
                Some(id)
                    if !id.is_empty()
                        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
                {
                    Ok(Layer::OpenAerialMap(id.to_string()))
                }
                _ => Err(CoreError::Validation(format!("'{other}' is not a valid layer"))),
            },
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl Serialize for Layer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for Layer {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
