//! Text payload of the sketch map QR code.
//!
//! Current form (UTF-8, comma separated, seven fields):
//! `version,uuid,lon_min,lat_min,lon_max,lat_max,layer`
//!
//! Sketch maps printed by older releases carry either six fields (no layer)
//! or a JSON object `{"id", "version", "bbox": {"lon_min", ...}}`. Both
//! imply the `osm` layer.

use serde::Deserialize;
use uuid::Uuid;

use crate::error::QrCodeError;
use crate::layer::Layer;
use crate::types::Bbox;
use crate::validation::parse_uuid_v4;

#[derive(Debug, Clone, PartialEq)]
pub struct QrPayload {
    pub version: String,
    pub uuid: Uuid,
    pub bbox: Bbox,
    pub layer: Layer,
}

#[derive(Deserialize)]
struct LegacyBbox {
    lon_min: f64,
    lat_min: f64,
    lon_max: f64,
    lat_max: f64,
}

#[derive(Deserialize)]
struct LegacyPayload {
    id: String,
    version: String,
    bbox: LegacyBbox,
}

impl QrPayload {
    /// Encode into the seven field form.
    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.version,
            self.uuid,
            self.bbox.lon_min,
            self.bbox.lat_min,
            self.bbox.lon_max,
            self.bbox.lat_max,
            self.layer
        )
    }

    /// Parse either payload form.
    pub fn parse(text: &str) -> Result<Self, QrCodeError> {
        let text = text.trim();
        if text.starts_with('{') {
            Self::parse_legacy_json(text)
        } else {
            Self::parse_csv(text)
        }
    }

    fn parse_csv(text: &str) -> Result<Self, QrCodeError> {
        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        if fields.len() < 6 {
            return Err(QrCodeError::UnexpectedContent);
        }
        let version = fields[0];
        if version.is_empty() {
            return Err(QrCodeError::UnexpectedContent);
        }
        let uuid = parse_uuid_v4(fields[1]).ok_or(QrCodeError::InvalidUuid)?;
        let mut coords = [0.0; 4];
        for (slot, raw) in coords.iter_mut().zip(&fields[2..6]) {
            *slot = raw.parse().map_err(|_| QrCodeError::UnexpectedContent)?;
        }
        let bbox = Bbox::new(coords[0], coords[1], coords[2], coords[3])
            .map_err(|_| QrCodeError::UnexpectedContent)?;
        let layer = match fields.get(6) {
            Some(raw) if !raw.is_empty() => {
                raw.parse().map_err(|_| QrCodeError::UnexpectedContent)?
            }
            _ => Layer::Osm,
        };
        Ok(Self {
            version: version.to_string(),
            uuid,
            bbox,
            layer,
        })
    }

    fn parse_legacy_json(text: &str) -> Result<Self, QrCodeError> {
        let raw: LegacyPayload =
            serde_json::from_str(text).map_err(|_| QrCodeError::UnexpectedContent)?;
        let uuid = parse_uuid_v4(&raw.id).ok_or(QrCodeError::InvalidUuid)?;
        let bbox = Bbox::new(
            raw.bbox.lon_min,
            raw.bbox.lat_min,
            raw.bbox.lon_max,
            raw.bbox.lat_max,
        )
        .map_err(|_| QrCodeError::UnexpectedContent)?;
        Ok(Self {
            version: raw.version,
            uuid,
            bbox,
            layer: Layer::Osm,
        })
    }
}
