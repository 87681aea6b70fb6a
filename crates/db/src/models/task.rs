//! Task queue rows.

use serde::Serialize;
use sketchmap_core::types::Timestamp;
use sqlx::FromRow;
use uuid::Uuid;

use super::status::{StatusId, TaskStatus};

/// A row from the `tasks` table without the result bytes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub status_id: StatusId,
    pub parent_id: Option<Uuid>,
    pub args: serde_json::Value,
    pub pending_children: i32,
    pub result_meta: Option<serde_json::Value>,
    pub error: Option<String>,
    pub recoverable: Option<bool>,
    pub worker: Option<String>,
    pub created_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Task {
    /// Unknown status ids are reported as pending.
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_id(self.status_id).unwrap_or(TaskStatus::Pending)
    }
}

/// Stored output of a successful task.
#[derive(Debug, Clone, FromRow)]
pub struct TaskOutput {
    pub id: Uuid,
    pub result: Option<Vec<u8>>,
    pub result_meta: Option<serde_json::Value>,
}

/// DTO for enqueueing a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: Uuid,
    pub kind: &'static str,
    pub args: serde_json::Value,
}

impl NewTask {
    pub fn new(kind: &'static str, args: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            args,
        }
    }
}

/// Unfinished tasks across the whole queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize)]
pub struct QueueDepth {
    pub pending: i64,
    pub running: i64,
}

/// Finished/total counts of a group's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize)]
pub struct GroupProgress {
    pub current: i64,
    pub total: i64,
    pub started: i64,
}
