//! Trigger endpoints: each call is one independent engine invocation.

use crate::api::error::ApiResult;
use crate::api::AppState;
use crate::engine::{AdvanceSummary, DiscoverSummary, RenewalSummary, Scope};
use crate::model::MeetingId;
use axum::{extract::State, response::Json, routing::post, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct AdvanceRequest {
    /// Advance only this meeting.
    pub meeting_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/triggers/advance", post(advance))
        .route("/triggers/renew", post(renew))
        .route("/triggers/discover", post(discover))
}

/// POST /triggers/advance
async fn advance(
    State(state): State<AppState>,
    body: Option<Json<AdvanceRequest>>,
) -> ApiResult<Json<AdvanceSummary>> {
    let scope = match body.and_then(|Json(req)| req.meeting_id) {
        Some(id) => Scope::Single(MeetingId::from_raw(id)),
        None => Scope::All,
    };
    info!("Advance triggered via API ({:?})", scope);
    Ok(Json(state.engine.advance(scope).await?))
}

/// POST /triggers/renew
async fn renew(State(state): State<AppState>) -> ApiResult<Json<RenewalSummary>> {
    info!("Subscription renewal triggered via API");
    Ok(Json(state.renewal.ensure_fresh(Utc::now()).await?))
}

/// POST /triggers/discover
async fn discover(State(state): State<AppState>) -> ApiResult<Json<DiscoverSummary>> {
    let lookback = state.engine.settings().discovery_lookback;
    info!("Discovery triggered via API");
    Ok(Json(state.engine.discover_upstream(lookback).await?))
}
