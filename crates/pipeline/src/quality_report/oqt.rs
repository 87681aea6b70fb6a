//! Client for the OSM quality report service (OQT).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use sketchmap_core::error::CoreError;
use sketchmap_core::types::Bbox;

pub const REPORT_NAME: &str = "SketchmapFitness";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum OqtError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OQT API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl From<OqtError> for CoreError {
    fn from(err: OqtError) -> Self {
        CoreError::QualityReport(format!("The OSM quality report could not be created ({err})."))
    }
}

/// Overall result of a report.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ReportResult {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct IndicatorMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct IndicatorTopic {
    #[serde(default)]
    pub key: String,
}

/// One indicator computed for one topic.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Indicator {
    #[serde(default)]
    pub metadata: IndicatorMetadata,
    #[serde(default, alias = "layer")]
    pub topic: IndicatorTopic,
    #[serde(default)]
    pub result: ReportResult,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Report {
    #[serde(default)]
    pub result: ReportResult,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ReportProperties {
    #[serde(default)]
    pub report: Report,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReportResponse {
    pub properties: ReportProperties,
}

/// GeoJSON feature of the bbox polygon, in WGS 84 degrees.
pub fn bbox_to_feature(bbox: &Bbox) -> serde_json::Value {
    json!({
        "type": "Feature",
        "properties": {},
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [bbox.lon_min, bbox.lat_min],
                [bbox.lon_max, bbox.lat_min],
                [bbox.lon_max, bbox.lat_max],
                [bbox.lon_min, bbox.lat_max],
                [bbox.lon_min, bbox.lat_min],
            ]],
        },
    })
}

pub struct OqtClient {
    client: reqwest::Client,
    api_url: String,
}

impl OqtClient {
    pub fn new(api_url: String, user_agent: &str) -> Result<Self, OqtError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, api_url))
    }

    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Request the sketch map fitness report for `bbox_wgs84`.
    pub async fn report(&self, bbox_wgs84: &Bbox) -> Result<ReportResponse, OqtError> {
        let body = json!({
            "name": REPORT_NAME,
            "bpolys": bbox_to_feature(bbox_wgs84),
            "includeSvg": false,
            "includeHtml": false,
            "flatten": false,
        });
        let response = self
            .client
            .post(format!("{}/report", self.api_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(OqtError::ApiError {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        Ok(response.json::<ReportResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api")
    }

    fn bbox() -> Bbox {
        Bbox::new(8.66, 49.39, 8.71, 49.42).unwrap()
    }

    #[test]
    fn bbox_feature_is_closed_ring() {
        let feature = bbox_to_feature(&bbox());
        let ring = feature["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
    }

    #[tokio::test]
    async fn report_is_requested_by_name() {
        let app = Router::new().route(
            "/api/report",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["name"], REPORT_NAME);
                Json(json!({
                    "properties": {
                        "report": {"result": {"label": "green", "description": "fit"}},
                        "indicators": [{
                            "metadata": {"name": "mapping-saturation"},
                            "topic": {"key": "building-count"},
                            "result": {"label": "yellow", "description": "half"}
                        }]
                    }
                }))
            }),
        );
        let client = OqtClient::new(serve(app).await, "test").unwrap();
        let report = client.report(&bbox()).await.unwrap();
        assert_eq!(report.properties.report.result.label, "green");
        assert_eq!(report.properties.indicators[0].topic.key, "building-count");
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let app = Router::new().route(
            "/api/report",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = OqtClient::new(serve(app).await, "test").unwrap();
        let err = client.report(&bbox()).await.unwrap_err();
        assert!(matches!(err, OqtError::ApiError { status: 500, .. }));
        let core: CoreError = err.into();
        assert_eq!(core.kind_name(), "OQTReportError");
        assert!(!core.is_recoverable());
    }
}
