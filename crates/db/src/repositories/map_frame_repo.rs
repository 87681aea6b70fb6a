//! Repository for the `map_frame` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::map_frame::{MapFrame, NewMapFrame};

/// Column list for `map_frame` queries.
const COLUMNS: &str = "uuid, file, bbox, lat, lon, format, orientation, layer, version, ts";

/// Stores and looks up map frame templates.
pub struct MapFrameRepo;

impl MapFrameRepo {
    /// Insert a template with its bbox. Rows are write-once.
    pub async fn insert(pool: &PgPool, input: &NewMapFrame) -> Result<MapFrame, sqlx::Error> {
        let query = format!(
            "INSERT INTO map_frame (uuid, file, bbox, lat, lon, format, orientation, layer, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MapFrame>(&query)
            .bind(input.uuid)
            .bind(&input.file)
            .bind(input.bbox_text())
            .bind(input.lat)
            .bind(input.lon)
            .bind(&input.format)
            .bind(&input.orientation)
            .bind(&input.layer)
            .bind(&input.version)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_uuid(pool: &PgPool, uuid: Uuid) -> Result<Option<MapFrame>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM map_frame WHERE uuid = $1");
        sqlx::query_as::<_, MapFrame>(&query)
            .bind(uuid)
            .fetch_optional(pool)
            .await
    }

    /// Null template and bbox of frames older than six months that no
    /// consented upload references. Returns the number of rows cleared.
    pub async fn clear_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE map_frame SET file = NULL, bbox = NULL \
             WHERE ts < NOW() - INTERVAL '6 months' \
               AND file IS NOT NULL \
               AND NOT EXISTS ( \
                   SELECT 1 FROM blob \
                   WHERE blob.map_frame_uuid = map_frame.uuid AND blob.consent = TRUE \
               )",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
