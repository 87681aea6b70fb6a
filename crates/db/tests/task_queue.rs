//! Task queue behaviour against a real database.

use std::time::Duration;

use sketchmap_core::request::{TASK_SKETCH_MAP, TASK_VECTOR_FILE, TASK_VECTOR_MERGE};
use sketchmap_db::models::status::TaskStatus;
use sketchmap_db::models::task::NewTask;
use sketchmap_db::repositories::TaskRepo;
use sqlx::PgPool;

async fn enqueue_group(pool: &PgPool, n: usize) -> (NewTask, Vec<NewTask>) {
    let parent = NewTask::new(TASK_VECTOR_MERGE, serde_json::json!({}));
    let children: Vec<NewTask> = (0..n)
        .map(|i| NewTask::new(TASK_VECTOR_FILE, serde_json::json!({ "file_id": i as i64 })))
        .collect();
    let mut tx = pool.begin().await.unwrap();
    TaskRepo::enqueue_group(&mut tx, &parent, &children)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    (parent, children)
}

// ---------------------------------------------------------------------------
// Test: group parent only becomes claimable after all children finished
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn parent_runs_after_children(pool: PgPool) {
    let (parent, _) = enqueue_group(&pool, 2).await;

    let first = TaskRepo::claim_next(&pool, "w1").await.unwrap().unwrap();
    let second = TaskRepo::claim_next(&pool, "w2").await.unwrap().unwrap();
    assert_eq!(first.kind, TASK_VECTOR_FILE);
    assert_eq!(second.kind, TASK_VECTOR_FILE);
    assert_eq!(first.status(), TaskStatus::Started);

    // Both children running: nothing else to claim.
    assert!(TaskRepo::claim_next(&pool, "w3").await.unwrap().is_none());

    TaskRepo::complete(&pool, first.id, b"{}", None).await.unwrap();
    assert!(TaskRepo::claim_next(&pool, "w3").await.unwrap().is_none());

    TaskRepo::fail(&pool, second.id, "QRCodeError: QR-Code could not be detected.", true)
        .await
        .unwrap();

    let claimed = TaskRepo::claim_next(&pool, "w3").await.unwrap().unwrap();
    assert_eq!(claimed.id, parent.id);
    assert_eq!(claimed.pending_children, 0);
}

// ---------------------------------------------------------------------------
// Test: progress counts finished children
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn group_progress_counts_terminal_children(pool: PgPool) {
    let (parent, _) = enqueue_group(&pool, 3).await;

    let progress = TaskRepo::group_progress(&pool, parent.id).await.unwrap();
    assert_eq!((progress.current, progress.total, progress.started), (0, 3, 0));

    let task = TaskRepo::claim_next(&pool, "w1").await.unwrap().unwrap();
    TaskRepo::complete(&pool, task.id, b"x", Some(&serde_json::json!({"file_name": "a.png"})))
        .await
        .unwrap();

    let progress = TaskRepo::group_progress(&pool, parent.id).await.unwrap();
    assert_eq!((progress.current, progress.total, progress.started), (1, 3, 1));

    let outputs = TaskRepo::successful_child_outputs(&pool, parent.id)
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].result.as_deref(), Some(&b"x"[..]));
}

// ---------------------------------------------------------------------------
// Test: failure is persisted with its recoverable flag
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn failure_is_persisted(pool: PgPool) {
    let task = NewTask::new("sketch-map", serde_json::json!({}));
    TaskRepo::enqueue(&pool, &task).await.unwrap();
    let claimed = TaskRepo::claim_next(&pool, "w1").await.unwrap().unwrap();

    TaskRepo::fail(&pool, claimed.id, "MapGenerationError: timeout", true)
        .await
        .unwrap();

    let row = TaskRepo::find(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.status(), TaskStatus::Failure);
    assert_eq!(row.error.as_deref(), Some("MapGenerationError: timeout"));
    assert_eq!(row.recoverable, Some(true));
    assert!(row.finished_at.is_some());
}

// ---------------------------------------------------------------------------
// Test: abandoned tasks are failed into their group
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn stale_started_child_is_failed_and_releases_parent(pool: PgPool) {
    let (parent, _) = enqueue_group(&pool, 2).await;
    let stuck = TaskRepo::claim_next(&pool, "w1").await.unwrap().unwrap();
    let recent = TaskRepo::claim_next(&pool, "w2").await.unwrap().unwrap();
    sqlx::query("UPDATE tasks SET claimed_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(stuck.id)
        .execute(&pool)
        .await
        .unwrap();

    let failed = TaskRepo::fail_stale(&pool, Duration::from_secs(3600), "Exception: abandoned")
        .await
        .unwrap();
    assert_eq!(failed, 1);

    let row = TaskRepo::find(&pool, stuck.id).await.unwrap().unwrap();
    assert_eq!(row.status(), TaskStatus::Failure);
    assert_eq!(row.error.as_deref(), Some("Exception: abandoned"));
    assert_eq!(row.recoverable, Some(false));
    let row = TaskRepo::find(&pool, recent.id).await.unwrap().unwrap();
    assert_eq!(row.status(), TaskStatus::Started);

    TaskRepo::complete(&pool, recent.id, b"{}", None).await.unwrap();
    let claimed = TaskRepo::claim_next(&pool, "w3").await.unwrap().unwrap();
    assert_eq!(claimed.id, parent.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn finished_tasks_are_never_stale(pool: PgPool) {
    let task = NewTask::new("sketch-map", serde_json::json!({}));
    TaskRepo::enqueue(&pool, &task).await.unwrap();
    TaskRepo::claim_next(&pool, "w1").await.unwrap().unwrap();
    TaskRepo::complete(&pool, task.id, b"%PDF", None).await.unwrap();
    sqlx::query("UPDATE tasks SET claimed_at = NOW() - INTERVAL '1 day'")
        .execute(&pool)
        .await
        .unwrap();

    let failed = TaskRepo::fail_stale(&pool, Duration::from_secs(60), "Exception: abandoned")
        .await
        .unwrap();
    assert_eq!(failed, 0);
    let row = TaskRepo::find(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.status(), TaskStatus::Success);
}

// ---------------------------------------------------------------------------
// Test: claiming can be restricted to task kinds
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn claim_skips_kinds_the_worker_does_not_serve(pool: PgPool) {
    enqueue_group(&pool, 1).await;
    let create = NewTask::new(TASK_SKETCH_MAP, serde_json::json!({}));
    TaskRepo::enqueue(&pool, &create).await.unwrap();

    let kinds = vec![TASK_SKETCH_MAP.to_string()];
    let claimed = TaskRepo::claim_next_of(&pool, "w1", &kinds).await.unwrap().unwrap();
    assert_eq!(claimed.id, create.id);
    assert!(TaskRepo::claim_next_of(&pool, "w1", &kinds).await.unwrap().is_none());

    let other = TaskRepo::claim_next(&pool, "w2").await.unwrap().unwrap();
    assert_eq!(other.kind, TASK_VECTOR_FILE);
}
