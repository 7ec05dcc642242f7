mod executor;

use anyhow::Context;
use executor::GradingContext;
use grader_common::config::GraderConfig;
use grader_common::redis::RedisStore;
use grader_common::store::JobQueue;
use grader_core::execution::ExecutionClient;
use grader_core::grading::GradingEngine;
use grader_core::runner::TestRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, instrument, warn};

/// BLPOP timeout so the loop observes shutdown between jobs.
const POP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Grader Worker booting...");

    let config = GraderConfig::load_default().context("Failed to load grader configuration")?;
    info!(
        languages = ?config.execution.languages.languages(),
        execution_url = %config.execution.base_url,
        "Configuration loaded"
    );

    let store = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?,
    );
    info!("Connected to Redis: {}", config.redis_url);

    let executor = ExecutionClient::new(&config.execution)
        .context("Failed to build execution client")?;

    let ctx = GradingContext {
        store: store.clone(),
        runner: TestRunner::new(store.clone(), Arc::new(executor), config.defaults),
        grading: GradingEngine::new(config.grading),
        run_timeout: Duration::from_millis(config.submissions.run_timeout_ms),
    };

    // Setup graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        warn!("Received shutdown signal, finishing current job...");
    };

    tokio::select! {
        _ = worker_loop(store.as_ref(), &ctx) => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip(queue, ctx))]
async fn worker_loop(queue: &dyn JobQueue, ctx: &GradingContext) {
    loop {
        match queue.pop_job(POP_TIMEOUT).await {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    submission_id = %job.submission_id,
                    "Received job"
                );

                let start = std::time::Instant::now();
                match executor::execute_job(&job, ctx).await {
                    Ok(submission) => {
                        info!(
                            job_id = %job.id,
                            status = ?submission.status,
                            score = ?submission.score,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Result persisted"
                        );
                    }
                    Err(e) => {
                        // Non-fatal - worker continues
                        error!(job_id = %job.id, error = %e, "Failed to grade submission");
                    }
                }
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
