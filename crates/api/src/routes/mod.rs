pub mod create;
pub mod digitize;
pub mod health;

use axum::routing::get;
use axum::Router;

use crate::handlers::results;
use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// GET /status/{uuid}/{type}      task status and progress
/// GET /download/{uuid}/{type}    result file
/// ```
///
/// `type` is one of `sketch-map`, `quality-report`, `vector-results`,
/// `raster-results`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status/{uuid}/{type}", get(results::status))
        .route("/download/{uuid}/{type}", get(results::download))
}
