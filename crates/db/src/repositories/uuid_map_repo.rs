//! Repository for the `uuid_map` table.

use std::collections::HashMap;

use sketchmap_core::request::RequestType;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::uuid_map::{self, UuidMapEntry};

/// Maps request uuids to the tasks that produce their results.
pub struct UuidMapRepo;

impl UuidMapRepo {
    pub async fn insert<'e, E>(
        executor: E,
        uuid: Uuid,
        map: &HashMap<RequestType, Uuid>,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query("INSERT INTO uuid_map (uuid, map) VALUES ($1, $2)")
            .bind(uuid)
            .bind(uuid_map::to_json(map))
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn find(pool: &PgPool, uuid: Uuid) -> Result<Option<UuidMapEntry>, sqlx::Error> {
        sqlx::query_as::<_, UuidMapEntry>("SELECT uuid, map FROM uuid_map WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(pool)
            .await
    }
}
