//! Handlers for the create flow: one sketch map PDF plus a quality report.

use std::collections::HashMap;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::response::Redirect;
use axum::Form;
use serde::Deserialize;
use sketchmap_core::error::CoreError;
use sketchmap_core::layer::Layer;
use sketchmap_core::paper_format::PaperFormat;
use sketchmap_core::request::{
    QualityReportArgs, RequestType, SketchMapArgs, TASK_QUALITY_REPORT, TASK_SKETCH_MAP,
};
use sketchmap_core::types::{Bbox, Orientation, Size};
use sketchmap_db::models::task::NewTask;
use sketchmap_db::repositories::{TaskRepo, UuidMapRepo};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Form fields posted by the map creation page.
#[derive(Debug, Deserialize)]
pub struct CreateForm {
    pub bbox: String,
    #[serde(rename = "bboxWGS84")]
    pub bbox_wgs84: String,
    pub format: String,
    pub orientation: String,
    pub size: String,
    pub scale: String,
    #[serde(default)]
    pub layer: Option<String>,
}

impl CreateForm {
    /// Validate all fields into task arguments for request `uuid`.
    pub fn into_args(self, uuid: Uuid) -> Result<SketchMapArgs, CoreError> {
        let bbox = Bbox::from_json_array(&self.bbox)?;
        let bbox_wgs84 = Bbox::from_json_array(&self.bbox_wgs84)?;
        let format = PaperFormat::by_name(&self.format)?;
        let orientation: Orientation = self.orientation.parse()?;
        let size = Size::from_json(&self.size)?;
        let scale: f64 = self
            .scale
            .trim()
            .parse()
            .ok()
            .filter(|s: &f64| s.is_finite() && *s > 0.0)
            .ok_or_else(|| CoreError::Validation(format!("'{}' is not a valid scale", self.scale)))?;
        let layer = match self.layer.as_deref().map(str::trim) {
            None | Some("") => Layer::Osm,
            Some(raw) => raw.parse()?,
        };

        Ok(SketchMapArgs {
            uuid,
            bbox,
            bbox_wgs84,
            format: format.name.to_string(),
            orientation,
            size,
            scale,
            layer,
        })
    }
}

/// POST /create/results
///
/// Enqueues the sketch map and quality report tasks and redirects to the
/// results page of the new request.
pub async fn create_results(
    State(state): State<AppState>,
    form: Result<Form<CreateForm>, FormRejection>,
) -> AppResult<Redirect> {
    let Form(form) = form.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let uuid = Uuid::new_v4();
    let args = form.into_args(uuid)?;

    let report_args = QualityReportArgs {
        bbox_wgs84: args.bbox_wgs84,
    };
    let sketch_map = NewTask::new(TASK_SKETCH_MAP, to_json(&args)?);
    let quality_report = NewTask::new(TASK_QUALITY_REPORT, to_json(&report_args)?);
    let map = HashMap::from([
        (RequestType::SketchMap, sketch_map.id),
        (RequestType::QualityReport, quality_report.id),
    ]);

    let mut tx = state.pool.begin().await?;
    TaskRepo::enqueue(&mut *tx, &sketch_map).await?;
    TaskRepo::enqueue(&mut *tx, &quality_report).await?;
    UuidMapRepo::insert(&mut *tx, uuid, &map).await?;
    tx.commit().await?;

    tracing::info!(%uuid, layer = %args.layer, format = %args.format, "Create request queued");
    Ok(Redirect::to(&format!("/create/results/{uuid}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> AppResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| AppError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn form() -> CreateForm {
        CreateForm {
            bbox: "[964472.19,6343459.03,967434.60,6345977.63]".into(),
            bbox_wgs84: "[8.66,49.38,8.69,49.40]".into(),
            format: "A4".into(),
            orientation: "landscape".into(),
            size: r#"{"width": 1716, "height": 1436.6}"#.into(),
            scale: "11545.12".into(),
            layer: None,
        }
    }

    #[test]
    fn valid_form_defaults_to_osm() {
        let uuid = Uuid::new_v4();
        let args = form().into_args(uuid).unwrap();
        assert_eq!(args.uuid, uuid);
        assert_eq!(args.format, "a4");
        assert_eq!(args.orientation, Orientation::Landscape);
        assert_eq!((args.size.width, args.size.height), (1716, 1437));
        assert_eq!(args.layer, Layer::Osm);
    }

    #[test]
    fn oam_layer_is_accepted() {
        let mut f = form();
        f.layer = Some("oam:59e62b8a3d6412ef72209d6c".into());
        let args = f.into_args(Uuid::new_v4()).unwrap();
        assert_eq!(args.layer, Layer::OpenAerialMap("59e62b8a3d6412ef72209d6c".into()));
    }

    #[test]
    fn invalid_fields_are_validation_errors() {
        let mut f = form();
        f.format = "a7".into();
        assert_matches!(f.into_args(Uuid::new_v4()), Err(CoreError::Validation(_)));

        let mut f = form();
        f.scale = "-3".into();
        assert_matches!(f.into_args(Uuid::new_v4()), Err(CoreError::Validation(_)));

        let mut f = form();
        f.bbox = "[1,2,3]".into();
        assert_matches!(f.into_args(Uuid::new_v4()), Err(CoreError::Validation(_)));
    }
}
