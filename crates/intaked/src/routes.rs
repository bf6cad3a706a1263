//! API routes for intaked

use crate::orchestrator::AnalysisRequest;
use crate::server::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use intake_common::{IntakeError, Report, VERSION};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

type AppStateArc = Arc<AppState>;

/// Map a run error to an HTTP status
fn error_response(e: IntakeError) -> (StatusCode, String) {
    let status = match &e {
        IntakeError::InvalidRequest(_) | IntakeError::Config(_) => StatusCode::BAD_REQUEST,
        IntakeError::SnapshotNotFound { .. } | IntakeError::ProfileNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        IntakeError::MetadataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("  Analysis failed ({}): {}", e.code(), e);
    (status, e.to_string())
}

// ============================================================================
// Analysis Routes
// ============================================================================

pub fn analysis_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/analyze", post(analyze))
        .route("/analyze", post(analyze))
}

async fn analyze(
    State(state): State<AppStateArc>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<Report>, (StatusCode, String)> {
    info!(
        "  Analyze {} (sources: {})",
        req.date,
        req.sources
            .as_ref()
            .map(|s| s.join(","))
            .unwrap_or_else(|| "all".to_string())
    );

    let report = state.analyzer.analyze(req).await.map_err(error_response)?;
    Ok(Json(report))
}

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Whether agentic runs are available
    pub oracle: bool,
    pub sources: usize,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health))
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        oracle: state.analyzer.has_oracle(),
        sources: state.repo.len(),
    })
}

// ============================================================================
// Source Routes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub entities: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSourcesResponse {
    pub sources: Vec<SourceInfo>,
}

pub fn source_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/sources", get(list_sources))
}

async fn list_sources(State(state): State<AppStateArc>) -> Json<ListSourcesResponse> {
    let sources = state
        .repo
        .profiles()
        .map(|p| SourceInfo {
            source_id: p.source_id.clone(),
            display_name: p.display_name.clone(),
            entities: p.entities.len(),
        })
        .collect();
    Json(ListSourcesResponse { sources })
}
