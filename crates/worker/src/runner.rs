//! Task claim loop.
//!
//! Each slot polls every `poll_interval`, claims one task of the kinds the
//! worker serves with [`TaskRepo::claim_next_of`] (`SELECT FOR UPDATE SKIP
//! LOCKED`) and drains the queue before sleeping again. Slots never
//! prefetch. A sweep fails tasks left running by dead workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sketchmap_db::models::task::Task;
use sketchmap_db::repositories::TaskRepo;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::WorkerContext;
use crate::tasks;

/// Error stored on tasks failed by the stale task sweep.
pub const STALE_TASK_ERROR: &str = "Exception: The task was abandoned before it finished.";

pub struct Runner {
    ctx: Arc<WorkerContext>,
}

impl Runner {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Run all slots until the cancellation token is triggered. A task in
    /// progress is finished before its slot stops.
    pub async fn run(&self, cancel: CancellationToken) {
        let concurrency = self.ctx.config.concurrency;
        tracing::info!(
            worker = %self.ctx.config.name,
            concurrency,
            poll_interval_ms = self.ctx.config.poll_interval.as_millis() as u64,
            "Task runner started",
        );

        let mut slots = JoinSet::new();
        for slot in 0..concurrency {
            let ctx = Arc::clone(&self.ctx);
            let cancel = cancel.clone();
            slots.spawn(async move { run_slot(ctx, slot, cancel).await });
        }
        {
            let ctx = Arc::clone(&self.ctx);
            let cancel = cancel.clone();
            slots.spawn(async move { run_sweep(ctx, cancel).await });
        }
        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Runner slot aborted");
            }
        }
        tracing::info!("Task runner stopped");
    }
}

async fn run_slot(ctx: Arc<WorkerContext>, slot: usize, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.config.poll_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                while !cancel.is_cancelled() {
                    match process_next(&ctx).await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            tracing::error!(slot, error = %e, "Task cycle failed");
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::debug!(slot, "Runner slot shutting down");
}

async fn run_sweep(ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval((ctx.config.stale_after / 4).max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = fail_stale_tasks(&ctx).await {
                    tracing::error!(error = %e, "Stale task sweep failed");
                }
            }
        }
    }
}

/// Fail tasks running for longer than `stale_after`.
pub async fn fail_stale_tasks(ctx: &WorkerContext) -> Result<u64, sqlx::Error> {
    let failed = TaskRepo::fail_stale(&ctx.pool, ctx.config.stale_after, STALE_TASK_ERROR).await?;
    if failed > 0 {
        tracing::warn!(failed, stale_after_secs = ctx.config.stale_after.as_secs(), "Stale tasks failed");
    }
    Ok(failed)
}

/// Claim and process one task. Returns `false` when the queue is empty.
pub async fn process_next(ctx: &WorkerContext) -> Result<bool, sqlx::Error> {
    let Some(task) = TaskRepo::claim_next_of(&ctx.pool, &ctx.config.name, &ctx.config.task_kinds).await? else {
        return Ok(false);
    };
    process(ctx, &task).await?;
    Ok(true)
}

/// Run a claimed task and store its outcome.
pub async fn process(ctx: &WorkerContext, task: &Task) -> Result<(), sqlx::Error> {
    tracing::info!(task_id = %task.id, kind = %task.kind, "Task claimed");
    let started = Instant::now();

    match tasks::run(ctx, task).await {
        Ok(output) => {
            TaskRepo::complete(&ctx.pool, task.id, &output.result, output.meta.as_ref()).await?;
            tracing::info!(
                task_id = %task.id,
                kind = %task.kind,
                bytes = output.result.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task succeeded",
            );
        }
        Err(failure) => {
            TaskRepo::fail(&ctx.pool, task.id, &failure.message, failure.recoverable).await?;
            tracing::warn!(
                task_id = %task.id,
                kind = %task.kind,
                error = %failure.message,
                recoverable = failure.recoverable,
                "Task failed",
            );
        }
    }
    Ok(())
}
