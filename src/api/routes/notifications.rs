//! Upstream change-notification webhook.

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::notifications::{self, NotificationBatch};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(rename = "validationToken")]
    pub validation_token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", post(receive))
}

/// POST /notifications
///
/// The subscription handshake carries a `validationToken` that has to be
/// echoed back as plain text.
async fn receive(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    body: String,
) -> ApiResult<Response> {
    if let Some(token) = query.validation_token {
        info!("Answering subscription validation request");
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response());
    }

    let batch: NotificationBatch = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid notification payload: {}", e)))?;
    let summary = notifications::handle_batch(&state.engine, &state.client_state, &batch).await?;
    Ok((StatusCode::ACCEPTED, Json(summary)).into_response())
}
