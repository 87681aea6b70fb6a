//! Consent based cleanup of stored files.

use crate::repositories::{BlobRepo, MapFrameRepo};
use crate::DbPool;

/// Rows touched by one cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub map_frames_cleared: u64,
    pub blobs_cleared: u64,
}

/// Null out map frame templates older than six months that no consented
/// upload references, and the files of uploads without consent.
///
/// Metadata rows are retained.
pub async fn run_cleanup(pool: &DbPool) -> Result<CleanupReport, sqlx::Error> {
    let map_frames_cleared = MapFrameRepo::clear_expired(pool).await?;
    let blobs_cleared = BlobRepo::clear_without_consent(pool).await?;
    tracing::info!(map_frames_cleared, blobs_cleared, "Cleanup finished");
    Ok(CleanupReport {
        map_frames_cleared,
        blobs_cleared,
    })
}
