//! Routes of the create flow.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{create, results};
use crate::state::AppState;

/// ```text
/// POST /create/results           create_results (form)
/// GET  /create/results/{uuid}    overview
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create/results", post(create::create_results))
        .route("/create/results/{uuid}", get(results::overview))
}
