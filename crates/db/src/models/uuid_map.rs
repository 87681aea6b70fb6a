//! Request uuid to task id mapping.

use std::collections::HashMap;

use sketchmap_core::request::RequestType;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `uuid_map` table. `map` is a JSON object keyed by
/// request type name with task ids as values.
#[derive(Debug, Clone, FromRow)]
pub struct UuidMapEntry {
    pub uuid: Uuid,
    pub map: serde_json::Value,
}

impl UuidMapEntry {
    /// Task id recorded for a result type, if any.
    pub fn task_id(&self, request_type: RequestType) -> Option<Uuid> {
        self.map
            .get(request_type.as_str())
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Serialise a type -> task id mapping for storage.
pub fn to_json(map: &HashMap<RequestType, Uuid>) -> serde_json::Value {
    let object: serde_json::Map<String, serde_json::Value> = map
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    serde_json::Value::Object(object)
}
