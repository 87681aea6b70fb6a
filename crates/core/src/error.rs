//! Domain error taxonomy shared by the API, the worker and the pipeline.
//!
//! Every variant carries a stable kind name (see [`CoreError::kind_name`])
//! that is persisted with failed tasks and shown to users as a prefix, e.g.
//! `QRCodeError: QR-Code could not be detected.`

/// Failures while locating or reading the QR code of an uploaded sketch map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrCodeError {
    #[error("QR-Code could not be detected.")]
    NotDetected,

    #[error("Multiple QR-Codes detected.")]
    Multiple,

    #[error("QR-Code does not have expected content.")]
    UnexpectedContent,

    #[error("The provided UUID is invalid.")]
    InvalidUuid,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A requested record is absent (unknown uuid, missing blob or task).
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Bad user input: bbox, uuid, paper format, request type, ...
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    QrCode(#[from] QrCodeError),

    /// The QR code references a map frame that was never stored here.
    #[error("The map frame {0} could not be found. It may have been created on a different instance.")]
    MapFrameMissing(String),

    /// The map frame exists but its template was removed by cleanup.
    #[error("The map frame {0} does not exist anymore. It has been removed after six months.")]
    MapFrameExpired(String),

    #[error("{0}")]
    UploadLimits(String),

    /// Base map retrieval failed (WMS timeout, transient errors after retries).
    #[error("{0}")]
    MapGeneration(String),

    /// Unexpected failure inside one of the ML stages.
    #[error("{0}")]
    ModelInference(String),

    /// The OSM quality report service did not deliver a usable report.
    #[error("{0}")]
    QualityReport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable name of the error kind, used as the persisted message prefix.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "UUIDNotFoundError",
            CoreError::Validation(_) => "ValueError",
            CoreError::QrCode(_) => "QRCodeError",
            CoreError::MapFrameMissing(_) => "CustomFileNotFoundError",
            CoreError::MapFrameExpired(_) => "CustomFileDoesNotExistAnymoreError",
            CoreError::UploadLimits(_) => "UploadLimitsExceededError",
            CoreError::MapGeneration(_) => "MapGenerationError",
            CoreError::ModelInference(_) => "ModelInferenceError",
            CoreError::QualityReport(_) => "OQTReportError",
            CoreError::Internal(_) => "Exception",
        }
    }

    /// Whether the failure is caused by the user's input rather than by the
    /// service. Recoverable failures are reported with HTTP 422, the rest
    /// with HTTP 500.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CoreError::ModelInference(_) | CoreError::QualityReport(_) | CoreError::Internal(_)
        )
    }

    /// User-facing message prefixed with the kind name.
    ///
    /// Internal errors are reduced to a generic message so that paths and
    /// driver details never reach a user.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Internal(_) => format!("{}: An unexpected error occurred.", self.kind_name()),
            other => format!("{}: {other}", other.kind_name()),
        }
    }
}
