use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use sketchmap_db::models::task::QueueDepth;
use sketchmap_db::repositories::TaskRepo;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the database is unreachable.
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    /// Task queue backlog; absent when the database is unreachable.
    pub queue: Option<QueueDepth>,
}

/// GET /health -- service, database and task queue health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = sketchmap_db::health_check(&state.pool).await.is_ok();
    let queue = if db_healthy {
        TaskRepo::queue_depth(&state.pool)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Task queue depth unavailable"))
            .ok()
    } else {
        None
    };

    Json(HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        version: sketchmap_core::VERSION,
        db_healthy,
        queue,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
