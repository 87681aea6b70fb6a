//! Routes of the digitize flow.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{digitize, results};
use crate::state::AppState;

/// ```text
/// POST /digitize/results           digitize_results (multipart)
/// GET  /digitize/results/{uuid}    overview
/// ```
///
/// Only the upload route gets the raised body limit.
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/digitize/results", post(digitize::digitize_results))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .route("/digitize/results/{uuid}", get(results::overview))
}
