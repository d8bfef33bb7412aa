//! JSON API over the derived views. This is the presentation
//! collaborator: it receives plain serializable records from the engine
//! and exposes them; all view computation stays in `spt-engine`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use spt_core::{ViewerContext, ViewerRole};
use spt_engine::{company_rollups, goal_progress, notifications, visible_to, PipelineSnapshot};
use spt_storage::SnapshotStore;
use tokio::net::TcpListener;
use tracing::warn;

pub const CRATE_NAME: &str = "spt-web";

#[derive(Clone)]
pub struct AppState {
    store: SnapshotStore,
}

impl AppState {
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            store: SnapshotStore::new(snapshot_path),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ViewerQuery {
    role: Option<String>,
    name: Option<String>,
}

impl ViewerQuery {
    fn viewer(&self) -> ViewerContext {
        let role = match self.role.as_deref() {
            Some("elevated") => ViewerRole::Elevated,
            _ => ViewerRole::Standard,
        };
        ViewerContext::new(role, self.name.clone().unwrap_or_default())
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/opportunities", get(opportunities_handler))
        .route("/api/companies", get(companies_handler))
        .route("/api/goals", get(goals_handler))
        .route("/api/notifications", get(notifications_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("SPT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let snapshot_path =
        std::env::var("SPT_SNAPSHOT_PATH").unwrap_or_else(|_| "pipeline.json".to_string());
    let state = AppState::new(snapshot_path);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(serde_json::json!({"status": "ok"})).into_response()
}

/// Reloads the snapshot on every request; derived views are recomputed
/// from scratch each time, which is the engine's consistency contract. A
/// missing snapshot file is the empty dataset, not an error.
async fn load_snapshot(state: &AppState) -> Result<PipelineSnapshot, Response> {
    state.store.load_or_default().await.map_err(|err| {
        warn!(error = %err, "failed to load snapshot");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response()
    })
}

async fn opportunities_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ViewerQuery>,
) -> Response {
    match load_snapshot(&state).await {
        Ok(snapshot) => {
            let visible = visible_to(&snapshot.opportunities, &query.viewer());
            Json(visible).into_response()
        }
        Err(resp) => resp,
    }
}

async fn companies_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ViewerQuery>,
) -> Response {
    match load_snapshot(&state).await {
        Ok(snapshot) => {
            let visible = visible_to(&snapshot.opportunities, &query.viewer());
            Json(company_rollups(&visible)).into_response()
        }
        Err(resp) => resp,
    }
}

async fn goals_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ViewerQuery>,
) -> Response {
    match load_snapshot(&state).await {
        Ok(snapshot) => {
            let viewer = query.viewer();
            // Goal targets are data too: an unconfigured profile sees no
            // progress entries at all, not entries with realized 0.
            if viewer.display_name.trim().is_empty() {
                return Json(Vec::<spt_engine::GoalProgress>::new()).into_response();
            }
            let visible = visible_to(&snapshot.opportunities, &viewer);
            Json(goal_progress(&snapshot.goals, &visible)).into_response()
        }
        Err(resp) => resp,
    }
}

async fn notifications_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ViewerQuery>,
) -> Response {
    match load_snapshot(&state).await {
        Ok(snapshot) => {
            let visible = visible_to(&snapshot.opportunities, &query.viewer());
            Json(notifications(&visible)).into_response()
        }
        Err(resp) => resp,
    }
}
