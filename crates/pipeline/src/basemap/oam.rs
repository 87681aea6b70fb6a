//! OpenAerialMap imagery and attribution.

use image::RgbImage;
use serde::Deserialize;
use sketchmap_core::types::{Bbox, Size};

use super::BaseMapError;
use crate::projection::mercator_to_wgs84;
use crate::raster::decode_rgb;

const COLLECTION_ID: &str = "openaerialmap";

#[derive(Debug, Deserialize)]
struct Provider {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ItemProperties {
    #[serde(default)]
    providers: Vec<Provider>,
}

#[derive(Debug, Deserialize)]
struct Item {
    properties: ItemProperties,
}

pub struct OamClient {
    client: reqwest::Client,
    api_url: String,
}

impl OamClient {
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn image_url(&self, item_id: &str, bbox: &Bbox, size: Size) -> String {
        let (lon_min, lat_min) = mercator_to_wgs84(bbox.lon_min, bbox.lat_min);
        let (lon_max, lat_max) = mercator_to_wgs84(bbox.lon_max, bbox.lat_max);
        format!(
            "{}/raster/collections/{COLLECTION_ID}/items/{item_id}/bbox/{lon_min},{lat_min},{lon_max},{lat_max}/{}x{}.png?assets=visual",
            self.api_url, size.width, size.height
        )
    }

    /// Item imagery for `bbox` (EPSG:3857).
    pub async fn get_map(&self, item_id: &str, bbox: &Bbox, size: Size) -> Result<RgbImage, BaseMapError> {
        let url = self.image_url(item_id, bbox, size);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BaseMapError::from_request)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::error!(%url, "OpenAerialMap item not found");
            return Err(BaseMapError::NotFound("Could not find OpenAerialMap item.".into()));
        }
        if !status.is_success() {
            return Err(BaseMapError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(BaseMapError::from_request)?;
        Ok(decode_rgb(&body)?)
    }

    async fn providers(&self, item_id: &str) -> Result<Vec<String>, BaseMapError> {
        let url = format!("{}/stac/collections/{COLLECTION_ID}/items/{item_id}", self.api_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BaseMapError::from_request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(BaseMapError::Status {
                status: status.as_u16(),
            });
        }
        let item: Item = response.json().await?;
        Ok(item.properties.providers.into_iter().map(|p| p.name).collect())
    }

    /// Attribution naming the item's providers, or the item id when the
    /// metadata cannot be read.
    pub async fn attribution(&self, item_id: &str) -> String {
        match self.providers(item_id).await {
            Ok(providers) if !providers.is_empty() => {
                format!("Powered by OpenAerialMap\nProviders: {}", providers.join(", "))
            }
            Ok(_) => format!("Powered by OpenAerialMap\nItem: {item_id}"),
            Err(e) => {
                tracing::warn!(item_id, error = %e, "OpenAerialMap metadata lookup failed");
                format!("Powered by OpenAerialMap\nItem: {item_id}")
            }
        }
    }
}
