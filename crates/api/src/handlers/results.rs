//! Result listing, status polling and download handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use sketchmap_core::error::CoreError;
use sketchmap_core::request::{RequestType, ALL_REQUEST_TYPES};
use sketchmap_core::validation::validate_uuid;
use sketchmap_db::models::status::TaskStatus;
use sketchmap_db::models::task::Task;
use sketchmap_db::models::uuid_map::UuidMapEntry;
use sketchmap_db::repositories::{BlobRepo, TaskRepo, UuidMapRepo};
use sketchmap_db::DbPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Links for one result of a request.
#[derive(Debug, Serialize)]
pub struct ResultLink {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub status_href: String,
    pub download_href: String,
}

#[derive(Debug, Serialize)]
pub struct ResultsOverview {
    pub uuid: Uuid,
    pub results: Vec<ResultLink>,
}

/// Finished and total children of a group.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Progress {
    pub current: i64,
    pub total: i64,
}

/// Body of `GET /api/status/{uuid}/{type}`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

fn is_group(request_type: RequestType) -> bool {
    matches!(
        request_type,
        RequestType::VectorResults | RequestType::RasterResults
    )
}

async fn find_entry(pool: &DbPool, raw_uuid: &str) -> AppResult<UuidMapEntry> {
    let uuid = validate_uuid(raw_uuid)?;
    UuidMapRepo::find(pool, uuid)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "UUID",
                id: uuid.to_string(),
            })
        })
}

/// Resolve `{uuid}/{type}` path parameters to the recorded task.
async fn find_task(pool: &DbPool, raw_uuid: &str, raw_type: &str) -> AppResult<(Uuid, RequestType, Task)> {
    let request_type: RequestType = raw_type.parse()?;
    let entry = find_entry(pool, raw_uuid).await?;
    let not_found = || {
        AppError::Core(CoreError::NotFound {
            entity: "UUID",
            id: format!("{} ({request_type})", entry.uuid),
        })
    };
    let task_id = entry.task_id(request_type).ok_or_else(not_found)?;
    let task = TaskRepo::find(pool, task_id).await?.ok_or_else(not_found)?;
    Ok((entry.uuid, request_type, task))
}

/// Error messages of failed children, in submission order.
fn child_errors(children: &[Task]) -> Vec<String> {
    children
        .iter()
        .filter(|c| c.status() == TaskStatus::Failure)
        .filter_map(|c| c.error.clone())
        .collect()
}

/// HTTP status for a task state. Failures use the persisted recoverable flag.
pub fn status_code(task: &Task) -> StatusCode {
    match task.status() {
        TaskStatus::Success => StatusCode::OK,
        TaskStatus::Pending | TaskStatus::Started => StatusCode::ACCEPTED,
        TaskStatus::Failure if task.recoverable.unwrap_or(false) => StatusCode::UNPROCESSABLE_ENTITY,
        TaskStatus::Failure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// GET /create/results/{uuid} and GET /digitize/results/{uuid}
pub async fn overview(
    State(state): State<AppState>,
    Path(raw_uuid): Path<String>,
) -> AppResult<Json<DataResponse<ResultsOverview>>> {
    let entry = find_entry(&state.pool, &raw_uuid).await?;
    let results = ALL_REQUEST_TYPES
        .into_iter()
        .filter(|t| entry.task_id(*t).is_some())
        .map(|t| ResultLink {
            request_type: t,
            status_href: format!("/api/status/{}/{t}", entry.uuid),
            download_href: format!("/api/download/{}/{t}", entry.uuid),
        })
        .collect();
    Ok(Json(DataResponse {
        data: ResultsOverview {
            uuid: entry.uuid,
            results,
        },
    }))
}

/// GET /api/status/{uuid}/{type}
///
/// 200 on success, 202 while queued or running, 422 for a failure caused
/// by the upload and 500 for any other failure.
pub async fn status(
    State(state): State<AppState>,
    Path((raw_uuid, raw_type)): Path<(String, String)>,
) -> AppResult<(StatusCode, Json<StatusResponse>)> {
    let (uuid, request_type, task) = find_task(&state.pool, &raw_uuid, &raw_type).await?;
    let task_status = task.status();

    let mut body = StatusResponse {
        id: uuid,
        request_type,
        status: task_status.as_str(),
        info: None,
        href: None,
        errors: None,
    };

    if is_group(request_type) {
        let progress = TaskRepo::group_progress(&state.pool, task.id).await?;
        body.info = Some(Progress {
            current: progress.current,
            total: progress.total,
        });
        let errors = child_errors(&TaskRepo::children(&state.pool, task.id).await?);
        if !errors.is_empty() {
            body.errors = Some(errors);
        }
    }

    match task_status {
        TaskStatus::Success => {
            body.href = Some(format!("/api/download/{uuid}/{request_type}"));
        }
        TaskStatus::Failure if body.errors.is_none() => {
            body.errors = task.error.clone().map(|e| vec![e]);
        }
        _ => {}
    }

    Ok((status_code(&task), Json(body)))
}

/// GET /api/download/{uuid}/{type}
pub async fn download(
    State(state): State<AppState>,
    Path((raw_uuid, raw_type)): Path<(String, String)>,
) -> AppResult<Response> {
    let (uuid, request_type, task) = find_task(&state.pool, &raw_uuid, &raw_type).await?;
    if task.status() != TaskStatus::Success {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Result",
            id: format!("{uuid} ({request_type})"),
        }));
    }
    let bytes = TaskRepo::output(&state.pool, task.id)
        .await?
        .and_then(|o| o.result)
        .ok_or_else(|| AppError::InternalError(format!("task {} has no stored result", task.id)))?;

    if is_group(request_type) {
        BlobRepo::mark_downloaded(&state.pool, uuid, request_type).await?;
    }

    tracing::info!(%uuid, %request_type, bytes = bytes.len(), "Result downloaded");
    Ok((
        [
            (header::CONTENT_TYPE, request_type.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", request_type.download_name()),
            ),
        ],
        Body::from(bytes),
    )
        .into_response())
}
