//! Repository for the `blob` table.

use sketchmap_core::request::RequestType;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::blob::{Blob, BlobSummary, NewBlob};
use crate::models::status::TaskStatus;

/// Column list for full `blob` queries.
const COLUMNS: &str = "id, digitize_uuid, map_frame_uuid, file_name, file, consent, ts";

/// Column list for metadata-only queries.
const SUMMARY_COLUMNS: &str = "\
    id, digitize_uuid, map_frame_uuid, file_name, consent, ts, \
    downloaded_vector, downloaded_raster";

/// Stores uploaded sketch maps.
pub struct BlobRepo;

impl BlobRepo {
    /// Store an upload, returning its id.
    pub async fn insert<'e, E>(executor: E, input: &NewBlob) -> Result<i64, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO blob (digitize_uuid, file_name, file, consent) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(input.digitize_uuid)
        .bind(&input.file_name)
        .bind(&input.file)
        .bind(input.consent)
        .fetch_one(executor)
        .await?;
        Ok(id)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Blob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM blob WHERE id = $1");
        sqlx::query_as::<_, Blob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_digitize_uuid(
        pool: &PgPool,
        digitize_uuid: Uuid,
    ) -> Result<Vec<BlobSummary>, sqlx::Error> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM blob WHERE digitize_uuid = $1 ORDER BY id"
        );
        sqlx::query_as::<_, BlobSummary>(&query)
            .bind(digitize_uuid)
            .fetch_all(pool)
            .await
    }

    /// Record which map frame the upload's QR code refers to.
    pub async fn set_map_frame_uuid(
        pool: &PgPool,
        id: i64,
        map_frame_uuid: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE blob SET map_frame_uuid = $2 WHERE id = $1")
            .bind(id)
            .bind(map_frame_uuid)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Stamp the download time of vector or raster results.
    pub async fn mark_downloaded(
        pool: &PgPool,
        digitize_uuid: Uuid,
        request_type: RequestType,
    ) -> Result<(), sqlx::Error> {
        let column = match request_type {
            RequestType::VectorResults => "downloaded_vector",
            RequestType::RasterResults => "downloaded_raster",
            _ => return Ok(()),
        };
        let query = format!("UPDATE blob SET {column} = NOW() WHERE digitize_uuid = $1");
        sqlx::query(&query).bind(digitize_uuid).execute(pool).await?;
        Ok(())
    }

    /// Null file and file name of uploads without consent once no queued
    /// or running task still needs them. Returns the number of rows cleared.
    pub async fn clear_without_consent(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE blob SET file = NULL, file_name = NULL \
             WHERE consent = FALSE \
               AND file IS NOT NULL \
               AND NOT EXISTS ( \
                   SELECT 1 FROM tasks t \
                   WHERE (t.args ->> 'file_id')::BIGINT = blob.id \
                     AND t.status_id IN ($1, $2) \
               )",
        )
        .bind(TaskStatus::Pending.id())
        .bind(TaskStatus::Started.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
