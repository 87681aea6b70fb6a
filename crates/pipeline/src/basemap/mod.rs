//! Base map retrieval for the create flow.
//!
//! OSM and Esri layers come from WMS endpoints, OpenAerialMap items from
//! the OAM raster API. Every failure surfaces as `MapGenerationError`.

pub mod oam;
pub mod wms;

use std::time::Duration;

use image::RgbImage;
use sketchmap_core::error::CoreError;
use sketchmap_core::layer::Layer;
use sketchmap_core::types::{Bbox, Size};

use crate::raster::RasterError;
use oam::OamClient;
use wms::{WmsClient, WmsLayer};

/// Connect timeout for all base map requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Message shown when the map server does not answer in time.
pub const TIMEOUT_MESSAGE: &str =
    "Map area couldn't be processed with the current resources. Please try again once.";

#[derive(Debug, thiserror::Error)]
pub enum BaseMapError {
    #[error("{TIMEOUT_MESSAGE}")]
    Timeout,

    #[error("map server request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("map server returned HTTP {status}")]
    Status { status: u16 },

    /// The server answered with an OGC service exception document.
    #[error("map server reported an error: {0}")]
    ServiceException(String),

    #[error("{0}")]
    NotFound(String),

    #[error("map image could not be decoded: {0}")]
    Decode(#[from] RasterError),
}

impl BaseMapError {
    /// Failures worth another attempt: connection problems and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            BaseMapError::Request(e) => e.is_connect(),
            BaseMapError::Status { status } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() && !err.is_connect() {
            BaseMapError::Timeout
        } else {
            BaseMapError::Request(err)
        }
    }
}

impl From<BaseMapError> for CoreError {
    fn from(err: BaseMapError) -> Self {
        match err {
            BaseMapError::Timeout | BaseMapError::NotFound(_) => CoreError::MapGeneration(err.to_string()),
            other => CoreError::MapGeneration(format!("The base map could not be retrieved ({other}).")),
        }
    }
}

/// Endpoints and limits of all base map sources.
#[derive(Debug, Clone)]
pub struct BaseMapConfig {
    pub osm: WmsLayer,
    pub esri_world_imagery: WmsLayer,
    pub esri_world_imagery_fallback: WmsLayer,
    pub read_timeout: Duration,
    pub oam_api_url: String,
    pub user_agent: String,
}

/// Shared client. `read_timeout` bounds each read, so large images that
/// keep streaming are never cut off.
pub(crate) fn http_client(user_agent: &str, read_timeout: Duration) -> Result<reqwest::Client, BaseMapError> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .build()?)
}

/// All base map sources behind one layer-keyed entry point.
pub struct BaseMaps {
    osm: WmsClient,
    esri_world_imagery: WmsClient,
    esri_world_imagery_fallback: WmsClient,
    oam: OamClient,
}

impl BaseMaps {
    pub fn new(config: &BaseMapConfig) -> Result<Self, BaseMapError> {
        let client = http_client(&config.user_agent, config.read_timeout)?;
        Ok(Self {
            osm: WmsClient::with_client(client.clone(), config.osm.clone()),
            esri_world_imagery: WmsClient::with_client(client.clone(), config.esri_world_imagery.clone()),
            esri_world_imagery_fallback: WmsClient::with_client(
                client.clone(),
                config.esri_world_imagery_fallback.clone(),
            ),
            oam: OamClient::with_client(client, config.oam_api_url.clone()),
        })
    }

    /// Map frame image for `bbox` (EPSG:3857) at `size` pixels.
    pub async fn fetch(&self, layer: &Layer, bbox: &Bbox, size: Size) -> Result<RgbImage, BaseMapError> {
        match layer {
            Layer::Osm => self.osm.get_map(bbox, size).await,
            Layer::EsriWorldImagery => self.esri_world_imagery.get_map(bbox, size).await,
            Layer::EsriWorldImageryFallback => self.esri_world_imagery_fallback.get_map(bbox, size).await,
            Layer::OpenAerialMap(item_id) => self.oam.get_map(item_id, bbox, size).await,
        }
    }

    /// Attribution text printed on the sketch map and bundled with results.
    pub async fn attribution(&self, layer: &Layer) -> String {
        match layer.static_attribution() {
            Some(text) => text.to_string(),
            None => match layer {
                Layer::OpenAerialMap(item_id) => self.oam.attribution(item_id).await,
                _ => String::new(),
            },
        }
    }
}
