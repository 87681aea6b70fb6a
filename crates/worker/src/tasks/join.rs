//! Group parents: join the per-file results of a digitize request.
//!
//! A parent is claimable once every child released its counter. Should a
//! parent still see unfinished children, it polls for a short while before
//! giving up.

use std::time::Duration;

use geojson::FeatureCollection;
use serde_json::json;
use sketchmap_core::error::CoreError;
use sketchmap_db::models::status::TaskStatus;
use sketchmap_db::models::task::{GroupProgress, Task, TaskOutput};
use sketchmap_db::repositories::TaskRepo;
use sketchmap_db::DbPool;
use sketchmap_pipeline::bundle::{build_raster_bundle, BundleEntry};
use sketchmap_pipeline::merge::merge;
use uuid::Uuid;

use super::{db_error, TaskFailure, TaskResult};
use crate::context::WorkerContext;

pub const JOIN_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Finished children of a group.
#[derive(Debug)]
pub struct Group {
    pub progress: GroupProgress,
    pub outputs: Vec<TaskOutput>,
    /// Failed children, in enqueue order.
    pub failures: Vec<TaskFailure>,
}

impl Group {
    /// Metadata stored with the joined result.
    pub fn meta(&self) -> serde_json::Value {
        let errors: Vec<&str> = self.failures.iter().map(|f| f.message.as_str()).collect();
        json!({
            "errors": errors,
            "progress": { "current": self.progress.current, "total": self.progress.total },
        })
    }

    /// The group fails with its first child error when no child succeeded.
    fn ensure_any_success(&self) -> Result<(), TaskFailure> {
        if !self.outputs.is_empty() {
            return Ok(());
        }
        Err(self.failures.first().cloned().unwrap_or_else(|| {
            CoreError::Validation("The request did not contain any file.".into()).into()
        }))
    }
}

/// Failures recorded on terminal children.
pub fn child_failures(children: &[Task]) -> Vec<TaskFailure> {
    children
        .iter()
        .filter(|t| t.status() == TaskStatus::Failure)
        .map(|t| TaskFailure {
            message: t.error.clone().unwrap_or_else(|| "Exception: An unexpected error occurred.".into()),
            recoverable: t.recoverable.unwrap_or(false),
        })
        .collect()
}

/// Wait until all children are terminal, then collect their outcomes.
pub async fn collect_group(pool: &DbPool, parent_id: Uuid) -> Result<Group, CoreError> {
    let mut waited = Duration::ZERO;
    let progress = loop {
        let progress = TaskRepo::group_progress(pool, parent_id).await.map_err(db_error)?;
        if progress.current >= progress.total {
            break progress;
        }
        if waited + JOIN_POLL_INTERVAL > JOIN_TIMEOUT {
            return Err(CoreError::Internal(format!(
                "group {parent_id} still has {} unfinished children",
                progress.total - progress.current
            )));
        }
        tracing::debug!(%parent_id, current = progress.current, total = progress.total, "Waiting for children");
        tokio::time::sleep(JOIN_POLL_INTERVAL).await;
        waited += JOIN_POLL_INTERVAL;
    };

    let children = TaskRepo::children(pool, parent_id).await.map_err(db_error)?;
    let outputs = TaskRepo::successful_child_outputs(pool, parent_id)
        .await
        .map_err(db_error)?;
    Ok(Group {
        progress,
        outputs,
        failures: child_failures(&children),
    })
}

fn output_bytes(output: &TaskOutput) -> Result<&[u8], CoreError> {
    output
        .result
        .as_deref()
        .ok_or_else(|| CoreError::Internal(format!("task {} has no result", output.id)))
}

/// Merge the per-file feature collections into one layered collection.
pub async fn vector_merge(ctx: &WorkerContext, parent_id: Uuid) -> Result<TaskResult, TaskFailure> {
    let group = collect_group(&ctx.pool, parent_id).await?;
    group.ensure_any_success()?;

    let collections = group
        .outputs
        .iter()
        .map(|o| {
            serde_json::from_slice::<FeatureCollection>(output_bytes(o)?)
                .map_err(|e| CoreError::Internal(format!("task {} result is not GeoJSON: {e}", o.id)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let merged = merge(collections, &ctx.config.digitize.post.catalogue);
    tracing::info!(
        %parent_id,
        features = merged.features.len(),
        errors = group.failures.len(),
        "Vector results merged"
    );

    let result = serde_json::to_vec(&merged).map_err(|e| CoreError::Internal(e.to_string()))?;
    Ok(TaskResult {
        result,
        meta: Some(group.meta()),
    })
}

/// Zip the per-file GeoTIFFs with the attributions of their layers.
pub async fn raster_bundle(ctx: &WorkerContext, parent_id: Uuid) -> Result<TaskResult, TaskFailure> {
    let group = collect_group(&ctx.pool, parent_id).await?;
    group.ensure_any_success()?;

    let mut entries = Vec::with_capacity(group.outputs.len());
    let mut attributions = Vec::new();
    for output in &group.outputs {
        let meta = output.result_meta.as_ref();
        let stem = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("sketch-map")
            .to_string();
        if let Some(text) = meta.and_then(|m| m.get("attribution")).and_then(|v| v.as_str()) {
            attributions.push(text.to_string());
        }
        entries.push(BundleEntry {
            stem,
            geotiff: output_bytes(output)?.to_vec(),
        });
    }

    let result = build_raster_bundle(&entries, &attributions).map_err(CoreError::from)?;
    tracing::info!(%parent_id, files = entries.len(), "Raster results bundled");
    Ok(TaskResult {
        result,
        meta: Some(group.meta()),
    })
}
