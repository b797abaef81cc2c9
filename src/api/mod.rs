//! REST API server for scribeline.
//!
//! Provides HTTP endpoints for:
//! - Engine triggers (advance, renew, discover)
//! - Upstream change notifications
//! - Meeting inspection and replay

pub mod error;
pub mod routes;

use crate::engine::{ReconciliationEngine, SubscriptionRenewalCoordinator};
use crate::error::ReconcileError;
use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

use error::ApiResult;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub engine: ReconciliationEngine,
    pub renewal: SubscriptionRenewalCoordinator,
    /// Expected `clientState` on change notifications; empty accepts all.
    pub client_state: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/status", get(status))
        .merge(routes::triggers::router())
        .merge(routes::notifications::router())
        .merge(routes::meetings::router())
        .layer(ServiceBuilder::new())
        .with_state(state)
}

pub struct ApiServer {
    bind_address: String,
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState, bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            state,
        }
    }

    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind API server to {}", self.bind_address))?;

        info!("API server listening on http://{}", self.bind_address);
        info!("Endpoints:");
        info!("  GET  /                     - Service info");
        info!("  GET  /status               - Record counts per state");
        info!("  POST /triggers/advance     - Advance all or one meeting");
        info!("  POST /triggers/renew       - Renew due subscriptions");
        info!("  POST /triggers/discover    - Discover recent meetings");
        info!("  POST /notifications        - Upstream change notifications");
        info!("  GET  /meetings             - List meeting records");
        info!("  GET  /meetings/:id         - Get one meeting record");
        info!("  POST /meetings/:id/replay  - Replay a failed meeting");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "scribeline",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// GET /status - Record counts per lifecycle state.
async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let store = state.engine.store();
    let counts = store.count_by_state().await.map_err(ReconcileError::from)?;
    let subscriptions = store
        .list_subscriptions()
        .await
        .map_err(ReconcileError::from)?;
    let expired = subscriptions
        .iter()
        .filter(|sub| sub.state == crate::model::SubscriptionState::Expired)
        .count();

    Ok(Json(json!({
        "meetings": counts,
        "subscriptions": subscriptions.len(),
        "expired_subscriptions": expired,
    })))
}
