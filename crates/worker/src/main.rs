use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sketchmap_worker::config::WorkerConfig;
use sketchmap_worker::context::WorkerContext;
use sketchmap_worker::models::ModelRegistry;
use sketchmap_worker::runner::Runner;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchmap_worker=debug,sketchmap_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let config = WorkerConfig::from_env();
    let pool = sketchmap_db::create_pool_with_size(&database_url, config.concurrency as u32 + 1)
        .await
        .expect("Failed to connect to database");
    sketchmap_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    // One-shot commands.
    if std::env::args().nth(1).as_deref() == Some("cleanup") {
        let report = sketchmap_db::cleanup::run_cleanup(&pool)
            .await
            .expect("Cleanup failed");
        tracing::info!(?report, "Cleanup complete");
        return;
    }

    sketchmap_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    // --- Models ---
    let models = if config.needs_models() {
        let models = ModelRegistry::load(&config.models).unwrap_or_else(|e| {
            panic!("Failed to load marking models: {e} (set SMT_WORKER_TASKS to run without vector-file)")
        });
        Some(models)
    } else {
        tracing::info!(tasks = ?config.task_kinds, "Vector digitize tasks not served, marking models not loaded");
        None
    };

    let ctx = WorkerContext::new(pool, config, models).expect("Failed to build HTTP clients");
    let runner = Runner::new(Arc::new(ctx));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    runner.run(cancel).await;
    tracing::info!("Worker shut down");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, finishing running tasks"),
        () = terminate => tracing::info!("Received SIGTERM, finishing running tasks"),
    }
}
