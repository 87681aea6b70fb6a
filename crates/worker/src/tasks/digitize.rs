//! Group children: one uploaded file each.

use image::RgbImage;
use serde_json::json;
use sketchmap_core::error::CoreError;
use sketchmap_core::qr_payload::QrPayload;
use sketchmap_core::request::FileTaskArgs;
use sketchmap_core::validation::file_stem;
use sketchmap_db::repositories::{BlobRepo, MapFrameRepo};
use sketchmap_pipeline::digitize::{decode_upload, georeference_upload, vectorize_upload, DecodedUpload};
use sketchmap_pipeline::raster::decode_rgb;

use super::{blocking, db_error, TaskResult};
use crate::context::WorkerContext;

/// An upload with its QR payload and the template it was printed from.
struct LoadedUpload {
    name: String,
    image: RgbImage,
    payload: QrPayload,
    template: RgbImage,
}

fn missing_file(file_id: i64) -> CoreError {
    CoreError::NotFound {
        entity: "File",
        id: file_id.to_string(),
    }
}

/// Read the blob, decode its QR code and look up the map frame template.
async fn load_upload(ctx: &WorkerContext, file_id: i64) -> Result<LoadedUpload, CoreError> {
    let blob = BlobRepo::find_by_id(&ctx.pool, file_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| missing_file(file_id))?;
    let name = blob.file_name.clone().unwrap_or_else(|| format!("file-{file_id}"));
    let bytes = blob.file.ok_or_else(|| missing_file(file_id))?;

    let DecodedUpload { image, payload } = blocking(move || decode_upload(&bytes)).await?;
    tracing::debug!(file_id, uuid = %payload.uuid, layer = %payload.layer, "QR code decoded");

    let frame = MapFrameRepo::find_by_uuid(&ctx.pool, payload.uuid)
        .await
        .map_err(db_error)?
        .ok_or_else(|| CoreError::MapFrameMissing(payload.uuid.to_string()))?;
    let template = frame
        .file
        .ok_or_else(|| CoreError::MapFrameExpired(payload.uuid.to_string()))?;
    BlobRepo::set_map_frame_uuid(&ctx.pool, blob.id, payload.uuid)
        .await
        .map_err(db_error)?;

    let template = blocking(move || Ok(decode_rgb(&template)?)).await?;
    Ok(LoadedUpload {
        name,
        image,
        payload,
        template,
    })
}

/// Vector chain of one file; the result is its GeoJSON FeatureCollection.
pub async fn vector_file(ctx: &WorkerContext, args: FileTaskArgs) -> Result<TaskResult, CoreError> {
    let upload = load_upload(ctx, args.file_id).await?;
    let registry = ctx.models()?;
    let models = registry.markings(upload.payload.layer.weight_family()).clone();
    let segmenter = registry.segmenter();
    let config = ctx.config.digitize.clone();
    let name = upload.name.clone();
    let layer = upload.payload.layer.to_string();

    let fc = blocking(move || {
        vectorize_upload(
            &upload.image,
            &upload.template,
            &upload.payload.bbox,
            &upload.name,
            &models,
            segmenter.as_ref(),
            &config,
        )
    })
    .await?;
    tracing::info!(file_id = args.file_id, features = fc.features.len(), "File vectorized");

    let result = serde_json::to_vec(&fc).map_err(|e| CoreError::Internal(e.to_string()))?;
    Ok(TaskResult {
        result,
        meta: Some(json!({ "name": name, "layer": layer })),
    })
}

/// Raster chain of one file; the result is a three band GeoTIFF.
pub async fn raster_file(ctx: &WorkerContext, args: FileTaskArgs) -> Result<TaskResult, CoreError> {
    let upload = load_upload(ctx, args.file_id).await?;
    let attribution = ctx.base_maps.attribution(&upload.payload.layer).await;
    let stem = file_stem(&upload.name).to_string();
    let layer = upload.payload.layer.to_string();
    let config = ctx.config.digitize.clone();

    let geotiff = blocking(move || {
        georeference_upload(&upload.image, &upload.template, &upload.payload.bbox, &config)
    })
    .await?;
    tracing::info!(file_id = args.file_id, bytes = geotiff.len(), "File georeferenced");

    Ok(TaskResult {
        result: geotiff,
        meta: Some(json!({ "name": stem, "layer": layer, "attribution": attribution })),
    })
}
