//! Create flow: printable sketch map and OSM quality report.

use chrono::Utc;
use sketchmap_core::error::CoreError;
use sketchmap_core::paper_format::PaperFormat;
use sketchmap_core::request::{QualityReportArgs, SketchMapArgs};
use sketchmap_core::VERSION;
use sketchmap_db::models::map_frame::NewMapFrame;
use sketchmap_db::repositories::MapFrameRepo;
use sketchmap_pipeline::quality_report::{default_analyses, evaluate_all, overall_result, render_report_pdf};
use sketchmap_pipeline::sketch_map::{render, SketchMapInput};

use super::{blocking, db_error, TaskResult};
use crate::context::WorkerContext;

/// Fetch the base map, render the PDF and store the map frame template.
///
/// The template row is written only after rendering succeeded, so a failed
/// task leaves nothing behind.
pub async fn sketch_map(ctx: &WorkerContext, args: SketchMapArgs) -> Result<TaskResult, CoreError> {
    let format = PaperFormat::by_name(&args.format)?;
    let base_map = ctx.base_maps.fetch(&args.layer, &args.bbox, args.size).await?;
    let attribution = ctx.base_maps.attribution(&args.layer).await;
    tracing::debug!(uuid = %args.uuid, layer = %args.layer, "Base map fetched");

    let input_args = args.clone();
    let rendered = blocking(move || {
        render(&SketchMapInput {
            uuid: input_args.uuid,
            version: VERSION.to_string(),
            bbox: input_args.bbox,
            layer: input_args.layer,
            format,
            orientation: input_args.orientation,
            scale: input_args.scale,
            base_map: &base_map,
            attribution: &attribution,
            created: Utc::now().date_naive(),
        })
    })
    .await?;

    let (lon, lat) = args.bbox_wgs84.center();
    MapFrameRepo::insert(
        &ctx.pool,
        &NewMapFrame {
            uuid: args.uuid,
            file: rendered.template,
            bbox: args.bbox,
            lat,
            lon,
            format: format.name.to_string(),
            orientation: args.orientation.as_str().to_string(),
            layer: args.layer.to_string(),
            version: VERSION.to_string(),
        },
    )
    .await
    .map_err(db_error)?;
    tracing::info!(uuid = %args.uuid, format = format.name, "Map frame stored");

    Ok(TaskResult::bytes(rendered.pdf))
}

/// Request the fitness report for the map area and render it.
pub async fn quality_report(ctx: &WorkerContext, args: QualityReportArgs) -> Result<TaskResult, CoreError> {
    let report = ctx.oqt.report(&args.bbox_wgs84).await?;
    let results = evaluate_all(&default_analyses(), &report);
    let overall = overall_result(&report);
    tracing::info!(analyses = results.len(), level = ?overall.level, "Quality report evaluated");
    let pdf = render_report_pdf(&overall, &results, &args.bbox_wgs84, Utc::now().date_naive());
    Ok(TaskResult::bytes(pdf))
}
