//! Handler for uploading marked sketch maps.
//!
//! The handler only checks upload limits and stores the files; QR decoding
//! and digitization run in the worker as one vector and one raster group.

use std::collections::HashMap;
use std::io::Cursor;

use axum::extract::{Multipart, State};
use axum::response::Redirect;
use image::ImageReader;
use serde_json::json;
use sketchmap_core::error::CoreError;
use sketchmap_core::request::{
    FileTaskArgs, RequestType, TASK_RASTER_BUNDLE, TASK_RASTER_FILE, TASK_VECTOR_FILE,
    TASK_VECTOR_MERGE,
};
use sketchmap_core::validation::{secure_filename, UploadLimits};
use sketchmap_db::models::blob::NewBlob;
use sketchmap_db::models::task::NewTask;
use sketchmap_db::repositories::{BlobRepo, TaskRepo, UuidMapRepo};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::create::to_json;
use crate::state::AppState;

/// One file part of the upload form.
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Image dimensions read from the header only.
pub fn image_dimensions(file: &UploadedFile) -> Result<(u32, u32), CoreError> {
    ImageReader::new(Cursor::new(&file.data))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .ok_or_else(|| {
            CoreError::Validation(format!("{} is not a supported image.", file.file_name))
        })
}

/// Reject uploads that exceed the configured count or pixel limits.
pub fn check_uploads(limits: &UploadLimits, files: &[UploadedFile]) -> Result<(), CoreError> {
    limits.check_file_count(files.len())?;
    for file in files {
        let (width, height) = image_dimensions(file)?;
        limits.check_dimensions(width, height)?;
    }
    Ok(())
}

fn is_consent(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "on" | "1" | "yes"
    )
}

/// POST /digitize/results (multipart)
///
/// Accepts `file` or `file[]` parts and an optional `consent` field.
pub async fn digitize_results(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Redirect> {
    let mut files = Vec::new();
    let mut consent = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "file[]" => {
                let file_name = secure_filename(field.file_name().unwrap_or(""));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
                files.push(UploadedFile {
                    file_name,
                    data: data.to_vec(),
                });
            }
            "consent" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                consent = is_consent(&value);
            }
            _ => {}
        }
    }

    check_uploads(&state.config.upload_limits, &files)?;

    let uuid = Uuid::new_v4();
    let file_count = files.len();
    let mut vector_children = Vec::with_capacity(file_count);
    let mut raster_children = Vec::with_capacity(file_count);

    let mut tx = state.pool.begin().await?;
    for file in files {
        let file_id = BlobRepo::insert(
            &mut *tx,
            &NewBlob {
                digitize_uuid: uuid,
                file_name: file.file_name,
                file: file.data,
                consent,
            },
        )
        .await?;
        let args = to_json(&FileTaskArgs { file_id })?;
        vector_children.push(NewTask::new(TASK_VECTOR_FILE, args.clone()));
        raster_children.push(NewTask::new(TASK_RASTER_FILE, args));
    }

    let vector = NewTask::new(TASK_VECTOR_MERGE, json!({ "uuid": uuid }));
    let raster = NewTask::new(TASK_RASTER_BUNDLE, json!({ "uuid": uuid }));
    TaskRepo::enqueue_group(&mut tx, &vector, &vector_children).await?;
    TaskRepo::enqueue_group(&mut tx, &raster, &raster_children).await?;
    let map = HashMap::from([
        (RequestType::VectorResults, vector.id),
        (RequestType::RasterResults, raster.id),
    ]);
    UuidMapRepo::insert(&mut *tx, uuid, &map).await?;
    tx.commit().await?;

    tracing::info!(%uuid, files = file_count, consent, "Digitize request queued");
    Ok(Redirect::to(&format!("/digitize/results/{uuid}")))
}
