//! Repository for the `tasks` table.
//!
//! The table doubles as broker and result backend. Workers claim one task
//! at a time with `SELECT ... FOR UPDATE SKIP LOCKED`. A group parent
//! carries a `pending_children` counter that every finishing child
//! decrements in the same transaction as its own terminal write, so a
//! parent becomes claimable exactly when all children are terminal.

use std::time::Duration;

use sketchmap_core::request::ALL_TASK_KINDS;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::status::TaskStatus;
use crate::models::task::{GroupProgress, NewTask, QueueDepth, Task, TaskOutput};

/// Column list for `tasks` queries (result bytes excluded).
const COLUMNS: &str = "\
    id, kind, status_id, parent_id, args, pending_children, result_meta, \
    error, recoverable, worker, created_at, claimed_at, finished_at";

/// Queue operations and result storage for background tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Enqueue a standalone task.
    pub async fn enqueue<'e, E>(executor: E, task: &NewTask) -> Result<(), sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query("INSERT INTO tasks (id, kind, status_id, args) VALUES ($1, $2, $3, $4)")
            .bind(task.id)
            .bind(task.kind)
            .bind(TaskStatus::Pending.id())
            .bind(&task.args)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Enqueue a group: a parent that runs after all children finished.
    ///
    /// Must run inside a transaction so the parent never becomes visible
    /// with a wrong counter.
    pub async fn enqueue_group(
        conn: &mut sqlx::PgConnection,
        parent: &NewTask,
        children: &[NewTask],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO tasks (id, kind, status_id, args, pending_children) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(parent.id)
        .bind(parent.kind)
        .bind(TaskStatus::Pending.id())
        .bind(&parent.args)
        .bind(children.len() as i32)
        .execute(&mut *conn)
        .await?;

        for child in children {
            sqlx::query(
                "INSERT INTO tasks (id, kind, status_id, args, parent_id) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(child.id)
            .bind(child.kind)
            .bind(TaskStatus::Pending.id())
            .bind(&child.args)
            .bind(parent.id)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Atomically claim the oldest runnable task of any kind.
    pub async fn claim_next(pool: &PgPool, worker: &str) -> Result<Option<Task>, sqlx::Error> {
        let kinds: Vec<String> = ALL_TASK_KINDS.iter().map(|k| k.to_string()).collect();
        Self::claim_next_of(pool, worker, &kinds).await
    }

    /// Atomically claim the oldest runnable task whose kind is in `kinds`.
    pub async fn claim_next_of(
        pool: &PgPool,
        worker: &str,
        kinds: &[String],
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks \
             SET worker = $1, claimed_at = NOW(), status_id = $2 \
             WHERE id = ( \
                 SELECT id FROM tasks \
                 WHERE status_id = $3 AND pending_children = 0 AND kind = ANY($4) \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(worker)
            .bind(TaskStatus::Started.id())
            .bind(TaskStatus::Pending.id())
            .bind(kinds)
            .fetch_optional(pool)
            .await
    }

    /// Fail every task that has been running for longer than `older_than`
    /// and release the parents of the failed children.
    ///
    /// Covers workers that died mid-task or lost the connection before
    /// storing the outcome. A task finishing concurrently keeps its own
    /// terminal state. Returns the number of failed tasks.
    pub async fn fail_stale(
        pool: &PgPool,
        older_than: Duration,
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let parents: Vec<(Option<Uuid>,)> = sqlx::query_as(
            "UPDATE tasks \
             SET status_id = $2, error = $3, recoverable = FALSE, finished_at = NOW() \
             WHERE status_id = $1 AND claimed_at < NOW() - make_interval(secs => $4) \
             RETURNING parent_id",
        )
        .bind(TaskStatus::Started.id())
        .bind(TaskStatus::Failure.id())
        .bind(error)
        .bind(older_than.as_secs_f64())
        .fetch_all(&mut *tx)
        .await?;
        for (parent_id,) in &parents {
            Self::release_parent(&mut tx, *parent_id).await?;
        }
        tx.commit().await?;
        Ok(parents.len() as u64)
    }

    pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn children(pool: &PgPool, parent_id: Uuid) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks WHERE parent_id = $1 ORDER BY created_at, id"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(parent_id)
            .fetch_all(pool)
            .await
    }

    /// Finished, started and total child counts of a group.
    pub async fn group_progress(
        pool: &PgPool,
        parent_id: Uuid,
    ) -> Result<GroupProgress, sqlx::Error> {
        sqlx::query_as::<_, GroupProgress>(
            "SELECT \
                 COUNT(*) FILTER (WHERE status_id IN ($2, $3)) AS current, \
                 COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE status_id <> $4) AS started \
             FROM tasks WHERE parent_id = $1",
        )
        .bind(parent_id)
        .bind(TaskStatus::Success.id())
        .bind(TaskStatus::Failure.id())
        .bind(TaskStatus::Pending.id())
        .fetch_one(pool)
        .await
    }

    /// Pending and running task counts.
    pub async fn queue_depth(pool: &PgPool) -> Result<QueueDepth, sqlx::Error> {
        sqlx::query_as::<_, QueueDepth>(
            "SELECT \
                 COUNT(*) FILTER (WHERE status_id = $1) AS pending, \
                 COUNT(*) FILTER (WHERE status_id = $2) AS running \
             FROM tasks",
        )
        .bind(TaskStatus::Pending.id())
        .bind(TaskStatus::Started.id())
        .fetch_one(pool)
        .await
    }

    /// Result bytes and metadata of a task.
    pub async fn output(pool: &PgPool, id: Uuid) -> Result<Option<TaskOutput>, sqlx::Error> {
        sqlx::query_as::<_, TaskOutput>("SELECT id, result, result_meta FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Outputs of all successful children, in enqueue order.
    pub async fn successful_child_outputs(
        pool: &PgPool,
        parent_id: Uuid,
    ) -> Result<Vec<TaskOutput>, sqlx::Error> {
        sqlx::query_as::<_, TaskOutput>(
            "SELECT id, result, result_meta FROM tasks \
             WHERE parent_id = $1 AND status_id = $2 \
             ORDER BY created_at, id",
        )
        .bind(parent_id)
        .bind(TaskStatus::Success.id())
        .fetch_all(pool)
        .await
    }

    /// Store a successful result and release the parent counter.
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        result: &[u8],
        meta: Option<&serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        let parent: Option<(Option<Uuid>,)> = sqlx::query_as(
            "UPDATE tasks \
             SET status_id = $2, result = $3, result_meta = $4, finished_at = NOW() \
             WHERE id = $1 \
             RETURNING parent_id",
        )
        .bind(id)
        .bind(TaskStatus::Success.id())
        .bind(result)
        .bind(meta)
        .fetch_optional(&mut *tx)
        .await?;
        Self::release_parent(&mut tx, parent.and_then(|(p,)| p)).await?;
        tx.commit().await
    }

    /// Record a failure and release the parent counter.
    ///
    /// `error` is the user-facing `Kind: message` text.
    pub async fn fail(
        pool: &PgPool,
        id: Uuid,
        error: &str,
        recoverable: bool,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        let parent: Option<(Option<Uuid>,)> = sqlx::query_as(
            "UPDATE tasks \
             SET status_id = $2, error = $3, recoverable = $4, finished_at = NOW() \
             WHERE id = $1 \
             RETURNING parent_id",
        )
        .bind(id)
        .bind(TaskStatus::Failure.id())
        .bind(error)
        .bind(recoverable)
        .fetch_optional(&mut *tx)
        .await?;
        Self::release_parent(&mut tx, parent.and_then(|(p,)| p)).await?;
        tx.commit().await
    }

    async fn release_parent(
        conn: &mut sqlx::PgConnection,
        parent_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        if let Some(parent_id) = parent_id {
            sqlx::query(
                "UPDATE tasks SET pending_children = GREATEST(pending_children - 1, 0) \
                 WHERE id = $1",
            )
            .bind(parent_id)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}
