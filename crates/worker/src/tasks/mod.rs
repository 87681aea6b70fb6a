//! Task runners, one per task kind.

pub mod create;
pub mod digitize;
pub mod join;

use serde::de::DeserializeOwned;
use sketchmap_core::error::CoreError;
use sketchmap_core::request::{
    TASK_QUALITY_REPORT, TASK_RASTER_BUNDLE, TASK_RASTER_FILE, TASK_SKETCH_MAP, TASK_VECTOR_FILE,
    TASK_VECTOR_MERGE,
};
use sketchmap_db::models::task::Task;

use crate::context::WorkerContext;

/// Bytes and metadata stored on a successful task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub result: Vec<u8>,
    pub meta: Option<serde_json::Value>,
}

impl TaskResult {
    pub fn bytes(result: Vec<u8>) -> Self {
        Self { result, meta: None }
    }
}

/// User-facing failure persisted on the task row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// `Kind: message`
    pub message: String,
    pub recoverable: bool,
}

impl From<CoreError> for TaskFailure {
    fn from(err: CoreError) -> Self {
        if let CoreError::Internal(detail) = &err {
            tracing::error!(detail = %detail, "Unexpected task failure");
        }
        Self {
            message: err.user_message(),
            recoverable: err.is_recoverable(),
        }
    }
}

/// Run one claimed task to completion.
pub async fn run(ctx: &WorkerContext, task: &Task) -> Result<TaskResult, TaskFailure> {
    match task.kind.as_str() {
        TASK_SKETCH_MAP => Ok(create::sketch_map(ctx, parse_args(task)?).await?),
        TASK_QUALITY_REPORT => Ok(create::quality_report(ctx, parse_args(task)?).await?),
        TASK_VECTOR_FILE => Ok(digitize::vector_file(ctx, parse_args(task)?).await?),
        TASK_RASTER_FILE => Ok(digitize::raster_file(ctx, parse_args(task)?).await?),
        TASK_VECTOR_MERGE => join::vector_merge(ctx, task.id).await,
        TASK_RASTER_BUNDLE => join::raster_bundle(ctx, task.id).await,
        other => Err(CoreError::Internal(format!("unknown task kind '{other}'")).into()),
    }
}

fn parse_args<T: DeserializeOwned>(task: &Task) -> Result<T, CoreError> {
    serde_json::from_value(task.args.clone())
        .map_err(|e| CoreError::Internal(format!("invalid arguments for {} task {}: {e}", task.kind, task.id)))
}

pub(crate) fn db_error(err: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("database error: {err}"))
}

/// Run a CPU bound stage on the blocking pool.
pub(crate) async fn blocking<T, F>(stage: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(stage)
        .await
        .map_err(|e| CoreError::Internal(format!("processing stage aborted: {e}")))?
}

#[cfg(test)]
mod tests {
    use sketchmap_core::error::QrCodeError;

    use super::*;

    #[test]
    fn failure_keeps_kind_prefix_and_recoverability() {
        let failure = TaskFailure::from(CoreError::from(QrCodeError::Multiple));
        assert_eq!(failure.message, "QRCodeError: Multiple QR-Codes detected.");
        assert!(failure.recoverable);

        let failure = TaskFailure::from(CoreError::ModelInference("Marking detection failed".into()));
        assert_eq!(failure.message, "ModelInferenceError: Marking detection failed");
        assert!(!failure.recoverable);
    }

    #[test]
    fn internal_failures_hide_details() {
        let failure = TaskFailure::from(CoreError::Internal("connection refused at 10.0.0.3".into()));
        assert_eq!(failure.message, "Exception: An unexpected error occurred.");
    }

    #[tokio::test]
    async fn blocking_stage_panic_becomes_internal_error() {
        let err = blocking::<(), _>(|| panic!("boom")).await.unwrap_err();
        assert_eq!(err.kind_name(), "Exception");
    }
}
