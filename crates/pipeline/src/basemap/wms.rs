//! WMS `GetMap` client with retries on transient failures.

use std::time::Duration;

use image::RgbImage;
use sketchmap_core::types::{Bbox, Size};

use super::BaseMapError;
use crate::raster::decode_rgb;

/// Backoff before each retry of a transient failure.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// One configured WMS layer.
#[derive(Debug, Clone)]
pub struct WmsLayer {
    /// Service URL, may already carry `SERVICE` and `VERSION`.
    pub url: String,
    pub layers: String,
    /// `image/png` or `image/jpeg`.
    pub format: String,
}

pub struct WmsClient {
    client: reqwest::Client,
    layer: WmsLayer,
    retry_delays: Vec<Duration>,
}

fn is_service_exception(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("xml")
}

impl WmsClient {
    pub fn with_client(client: reqwest::Client, layer: WmsLayer) -> Self {
        Self {
            client,
            layer,
            retry_delays: RETRY_DELAYS.to_vec(),
        }
    }

    /// Override the retry backoff, mostly for tests.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Fetch the map image for `bbox` (EPSG:3857).
    ///
    /// Read timeouts fail at once; connection errors and 5xx responses are
    /// retried after each configured delay.
    pub async fn get_map(&self, bbox: &Bbox, size: Size) -> Result<RgbImage, BaseMapError> {
        let mut attempt = 0;
        loop {
            match self.try_get_map(bbox, size).await {
                Ok(image) => return Ok(image),
                Err(e) if e.is_transient() && attempt < self.retry_delays.len() => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %self.layer.url,
                        error = %e,
                        "WMS request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delays[attempt]).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(url = %self.layer.url, error = %e, "WMS request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn try_get_map(&self, bbox: &Bbox, size: Size) -> Result<RgbImage, BaseMapError> {
        let width = size.width.to_string();
        let height = size.height.to_string();
        let bbox = bbox.to_wms_param();
        let response = self
            .client
            .get(&self.layer.url)
            .query(&[
                ("REQUEST", "GetMap"),
                ("FORMAT", self.layer.format.as_str()),
                ("TRANSPARENT", "FALSE"),
                ("LAYERS", self.layer.layers.as_str()),
                ("WIDTH", width.as_str()),
                ("HEIGHT", height.as_str()),
                ("SRS", "EPSG:3857"),
                ("STYLES", ""),
                ("BBOX", bbox.as_str()),
            ])
            .send()
            .await
            .map_err(BaseMapError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BaseMapError::Status {
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await.map_err(BaseMapError::from_request)?;
        if is_service_exception(&content_type) {
            let text = String::from_utf8_lossy(&body);
            return Err(BaseMapError::ServiceException(text.trim().chars().take(500).collect()));
        }
        Ok(decode_rgb(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use axum::extract::{Query, State};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use image::Rgb;

    use super::*;
    use crate::basemap::http_client;
    use crate::raster::encode_png;

    fn bbox() -> Bbox {
        Bbox::new(964472.19, 6343459.03, 967434.6, 6345977.63).unwrap()
    }

    const SIZE: Size = Size { width: 8, height: 6 };

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/wms?SERVICE=WMS&VERSION=1.1.1")
    }

    fn client(url: String, read_timeout: Duration) -> WmsClient {
        let layer = WmsLayer {
            url,
            layers: "heigit:osm-carto@2xx".into(),
            format: "image/png".into(),
        };
        WmsClient::with_client(http_client("sketch-map-tool-test", read_timeout).unwrap(), layer)
            .with_retry_delays(vec![Duration::from_millis(10), Duration::from_millis(20)])
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))).unwrap()
    }

    async fn get_map(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
        let ok = params.get("REQUEST").map(String::as_str) == Some("GetMap")
            && params.get("SRS").map(String::as_str) == Some("EPSG:3857")
            && params.get("SERVICE").map(String::as_str) == Some("WMS")
            && params.get("BBOX").map(String::as_str) == Some("964472.19,6343459.03,967434.6,6345977.63");
        if !ok {
            return (StatusCode::BAD_REQUEST, "bad params").into_response();
        }
        let width: u32 = params["WIDTH"].parse().unwrap();
        let height: u32 = params["HEIGHT"].parse().unwrap();
        ([(header::CONTENT_TYPE, "image/png")], png(width, height)).into_response()
    }

    // ---------------------------------------------------------------------------
    // Test: successful GetMap
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn get_map_returns_decoded_image() {
        let url = serve(Router::new().route("/wms", get(get_map))).await;
        let image = client(url, Duration::from_secs(5)).get_map(&bbox(), SIZE).await.unwrap();
        assert_eq!(image.dimensions(), (8, 6));
        assert_eq!(image.get_pixel(0, 0), &Rgb([200, 10, 10]));
    }

    // ---------------------------------------------------------------------------
    // Test: read timeout fails without retry
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn slow_server_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/wms",
                get(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    ([(header::CONTENT_TYPE, "image/png")], png(8, 6))
                }),
            )
            .with_state(calls.clone());
        let url = serve(app).await;

        let result = client(url, Duration::from_millis(200)).get_map(&bbox(), SIZE).await;
        assert_matches!(result, Err(BaseMapError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // ---------------------------------------------------------------------------
    // Test: a body that keeps streaming outlives the read timeout
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn steady_stream_is_not_cut_off() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
            }
            let body = png(8, 6);
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: image/png\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for chunk in body.chunks(body.len().div_ceil(4)) {
                tokio::time::sleep(Duration::from_millis(150)).await;
                socket.write_all(chunk).await.unwrap();
                socket.flush().await.unwrap();
            }
        });

        let url = format!("http://{addr}/wms?SERVICE=WMS&VERSION=1.1.1");
        let image = client(url, Duration::from_millis(400)).get_map(&bbox(), SIZE).await.unwrap();
        assert_eq!(image.dimensions(), (8, 6));
    }

    // ---------------------------------------------------------------------------
    // Test: transient failures are retried
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn server_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/wms",
                get(|State(calls): State<Arc<AtomicUsize>>| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response()
                    } else {
                        ([(header::CONTENT_TYPE, "image/png")], png(8, 6)).into_response()
                    }
                }),
            )
            .with_state(calls.clone());
        let url = serve(app).await;

        let image = client(url, Duration::from_secs(5)).get_map(&bbox(), SIZE).await.unwrap();
        assert_eq!(image.width(), 8);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let app = Router::new().route("/wms", get(|| async { StatusCode::BAD_GATEWAY }));
        let url = serve(app).await;
        let result = client(url, Duration::from_secs(5)).get_map(&bbox(), SIZE).await;
        assert_matches!(result, Err(BaseMapError::Status { status: 502 }));
    }

    // ---------------------------------------------------------------------------
    // Test: XML service exceptions are errors
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn xml_response_is_an_error() {
        let app = Router::new().route(
            "/wms",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/vnd.ogc.se_xml")],
                    "<ServiceExceptionReport><ServiceException>Layer not defined</ServiceException></ServiceExceptionReport>",
                )
            }),
        );
        let url = serve(app).await;
        let result = client(url, Duration::from_secs(5)).get_map(&bbox(), SIZE).await;
        assert_matches!(result, Err(BaseMapError::ServiceException(text)) if text.contains("Layer not defined"));
    }
}
