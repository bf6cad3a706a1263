//! HTTP server for intaked

use crate::orchestrator::Analyzer;
use crate::routes;
use anyhow::Result;
use axum::Router;
use intake_common::{CvRepository, IntakeConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
    pub repo: Arc<CvRepository>,
    pub config: IntakeConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(analyzer: Analyzer, repo: Arc<CvRepository>, config: IntakeConfig) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            repo,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Router with every route and the tracing/timeout layers
pub fn app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs.max(1));
    let state = Arc::new(state);

    Router::new()
        .merge(routes::analysis_routes())
        .merge(routes::health_routes())
        .merge(routes::source_routes())
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server
pub async fn run(state: AppState) -> Result<()> {
    let addr = state.config.server.bind.clone();
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down gracefully");
    }
}
