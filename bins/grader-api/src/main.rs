mod error;
mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use grader_common::config::GraderConfig;
use grader_common::redis::RedisStore;
use grader_common::store::{JobQueue, RecordStore};
use grader_core::execution::{CodeExecutor, ExecutionClient};
use grader_core::grading::GradingEngine;
use grader_core::similarity::SimilarityEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub queue: Arc<dyn JobQueue>,
    pub executor: Arc<dyn CodeExecutor>,
    pub grading: GradingEngine,
    pub similarity: SimilarityEngine,
    pub config: GraderConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Grader API booting...");

    let config = GraderConfig::load_default().context("Failed to load grader configuration")?;
    metrics::register().context("Failed to register metrics")?;

    let store = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?,
    );
    info!("Connected to Redis: {}", config.redis_url);

    let executor =
        ExecutionClient::new(&config.execution).context("Failed to build execution client")?;

    let state = Arc::new(AppState {
        store: store.clone(),
        queue: store,
        executor: Arc::new(executor),
        grading: GradingEngine::new(config.grading),
        similarity: SimilarityEngine::new(&config.plagiarism, &config.execution.languages),
        config,
    });

    let addr = state.config.bind.clone();
    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
