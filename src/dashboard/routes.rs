//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::engine::{Orchestrator, RunRequest, SportRecord};
use crate::types::{EnrichedProjection, Sport, Stage, StatFilter};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub orchestrator: Arc<Orchestrator>,
}

impl DashboardState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub session_id: Option<Uuid>,
    pub sport: Option<Sport>,
    pub stage: Stage,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
    pub attempt: u32,
    pub result_count: usize,
    pub enriched: bool,
    pub in_flight: Option<RunRequest>,
    pub published_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectionsResponse {
    pub sport: Option<Sport>,
    pub enriched: bool,
    pub count: usize,
    pub projections: Vec<EnrichedProjection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunBody {
    pub sport: Option<String>,
    pub prop_type: Option<String>,
    #[serde(default)]
    pub stat_filter: Option<StatFilter>,
    /// Attempts already spent by the caller on this request.
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunAccepted {
    pub session_id: Uuid,
    pub sport: Sport,
    pub attempts_spent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRejected {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.orchestrator.snapshot();
    Json(StatusResponse {
        session_id: snap.session_id,
        sport: snap.sport,
        stage: snap.stage,
        progress: snap.progress,
        message: snap.message,
        error: snap.error,
        attempt: snap.attempt,
        result_count: snap.result_count,
        enriched: snap.enriched,
        in_flight: state.orchestrator.in_flight(),
        published_at: snap.published_at.map(|t| t.to_rfc3339()),
        updated_at: snap.updated_at.map(|t| t.to_rfc3339()),
    })
}

/// GET /api/projections
pub async fn get_projections(State(state): State<AppState>) -> Json<ProjectionsResponse> {
    let snap = state.orchestrator.snapshot();
    Json(ProjectionsResponse {
        sport: snap.sport,
        enriched: snap.enriched,
        count: snap.projections.len(),
        projections: snap.projections.as_ref().clone(),
    })
}

/// GET /api/sports
pub async fn get_sports(State(state): State<AppState>) -> Json<BTreeMap<String, SportRecord>> {
    Json(state.orchestrator.sport_records())
}

/// POST /api/run
///
/// Starts a run in the background. 409 when the same request is already
/// running.
pub async fn post_run(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> Result<(StatusCode, Json<RunAccepted>), (StatusCode, Json<RunRejected>)> {
    let defaults = state.orchestrator.config();
    let request = RunRequest::new(
        body.sport
            .map(Sport::new)
            .unwrap_or_else(|| defaults.default_sport()),
        body.prop_type
            .unwrap_or_else(|| defaults.default_prop_type.clone()),
        body.stat_filter
            .unwrap_or_else(|| defaults.default_stat_filter()),
    );

    let Some(session) = state
        .orchestrator
        .begin_with_attempts(request.clone(), body.attempt)
    else {
        return Err((
            StatusCode::CONFLICT,
            Json(RunRejected {
                error: format!(
                    "A run for {} / {} / {} is already in progress",
                    request.sport, request.prop_type, request.stat_filter
                ),
            }),
        ));
    };

    let accepted = RunAccepted {
        session_id: session.id(),
        sport: session.sport().clone(),
        attempts_spent: session.attempt(),
    };
    info!(session_id = %accepted.session_id, sport = %accepted.sport, "Run requested via dashboard");

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.drive(session).await;
    });

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
