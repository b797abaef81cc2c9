//! Meeting record API endpoints.
//!
//! Provides HTTP endpoints for:
//! - Listing meeting records (GET /meetings)
//! - Getting a specific record (GET /meetings/:id)
//! - Replaying a failed record (POST /meetings/:id/replay)

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::db::MeetingFilter;
use crate::engine::ReplayOutcome;
use crate::error::ReconcileError;
use crate::model::{LifecycleState, MeetingId, MeetingRecord};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::info;

/// Query parameters for listing meetings.
#[derive(Debug, Default, Deserialize)]
pub struct MeetingQueryParams {
    /// Lifecycle state, e.g. `transcript_pending`.
    pub state: Option<String>,
    /// Maximum results (default 50)
    pub limit: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/meetings", get(list_meetings))
        .route("/meetings/:id", get(get_meeting))
        .route("/meetings/:id/replay", post(replay_meeting))
}

/// GET /meetings - List meeting records, newest first.
async fn list_meetings(
    State(state): State<AppState>,
    Query(params): Query<MeetingQueryParams>,
) -> ApiResult<Json<Vec<MeetingRecord>>> {
    let lifecycle = match params.state.as_deref() {
        Some(raw) => Some(
            LifecycleState::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))?,
        ),
        None => None,
    };
    let filter = MeetingFilter {
        state: lifecycle,
        limit: params.limit,
    };
    let records = state
        .engine
        .store()
        .list_meetings(&filter)
        .await
        .map_err(ReconcileError::from)?;
    Ok(Json(records))
}

/// GET /meetings/:id - Get a single record.
async fn get_meeting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MeetingRecord>> {
    let record = state
        .engine
        .store()
        .get(&MeetingId::from_raw(id.clone()))
        .await
        .map_err(ReconcileError::from)?
        .ok_or_else(|| ApiError::not_found(format!("Meeting {} not found", id)))?;
    Ok(Json(record))
}

/// POST /meetings/:id/replay - Re-arm a failed record.
async fn replay_meeting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReplayOutcome>> {
    info!("Replay requested via API for {}", id);
    match state.engine.replay(&MeetingId::from_raw(id.clone())).await? {
        ReplayOutcome::NotFound => Err(ApiError::not_found(format!("Meeting {} not found", id))),
        ReplayOutcome::Contended => Err(ApiError::conflict(format!(
            "Meeting {} is being updated concurrently, retry the replay",
            id
        ))),
        outcome => Ok(Json(outcome)),
    }
}
