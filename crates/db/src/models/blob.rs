//! Uploaded sketch maps.

use serde::Serialize;
use sketchmap_core::types::Timestamp;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `blob` table including the file bytes.
#[derive(Debug, Clone, FromRow)]
pub struct Blob {
    pub id: i64,
    pub digitize_uuid: Uuid,
    pub map_frame_uuid: Option<Uuid>,
    pub file_name: Option<String>,
    pub file: Option<Vec<u8>>,
    pub consent: bool,
    pub ts: Timestamp,
}

/// Blob metadata without the file bytes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BlobSummary {
    pub id: i64,
    pub digitize_uuid: Uuid,
    pub map_frame_uuid: Option<Uuid>,
    pub file_name: Option<String>,
    pub consent: bool,
    pub ts: Timestamp,
    pub downloaded_vector: Option<Timestamp>,
    pub downloaded_raster: Option<Timestamp>,
}

/// DTO for storing an upload.
#[derive(Debug, Clone)]
pub struct NewBlob {
    pub digitize_uuid: Uuid,
    pub file_name: String,
    pub file: Vec<u8>,
    pub consent: bool,
}
