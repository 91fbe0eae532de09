//! Deploy platform HTTP routes — inbound triggers and agent callbacks.

pub mod api;
pub mod hook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use crate::config::DeployConfig;
use crate::db::DbPool;
use crate::notify::Notifier;
use crate::services::release_service;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct DeployRouterState {
    pub pool: DbPool,
    pub config: DeployConfig,
    pub notifier: Arc<Notifier>,
}

/// Build the deploy platform's Axum router.
pub fn deploy_router(state: DeployRouterState) -> Router {
    Router::new()
        // Inbound repo push hook
        .route("/api/build/{idhash}", post(build_hook_handler))
        // Build API
        .route("/api/builds/trigger", post(trigger_build_handler))
        .route("/api/builds/{build_id}", get(get_build_handler))
        // Release API
        .route("/api/releases", post(create_release_handler))
        .route("/api/releases/{release_id}/run", post(run_release_handler))
        .route("/api/sign/{idhash}", get(sign_handler))
        // Agent checkin
        .route("/api/checkin", post(checkin_handler))
        .with_state(state)
}

// ── Build hook ──

async fn build_hook_handler(
    State(state): State<DeployRouterState>,
    Path(idhash): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    crate::metrics::trigger_received("build_hook");
    hook::handle_build_hook(&state, &idhash, body).await
}

async fn checkin_handler(
    State(state): State<DeployRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    crate::metrics::trigger_received("checkin");
    hook::handle_checkin(&state, &headers, body).await
}

// ── Build API ──

async fn trigger_build_handler(
    State(state): State<DeployRouterState>,
    Json(req): Json<api::TriggerRequest>,
) -> Result<(StatusCode, Json<api::TriggerResponse>), StatusCode> {
    crate::metrics::trigger_received("build");
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    api::trigger_build(&mut conn, req.project_id)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
        .map_err(|e| {
            tracing::error!("Trigger build error: {e}");
            StatusCode::BAD_REQUEST
        })
}

async fn get_build_handler(
    State(state): State<DeployRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<api::BuildJson>, StatusCode> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    api::get_build(&mut conn, build_id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

// ── Release API ──

async fn create_release_handler(
    State(state): State<DeployRouterState>,
    Json(req): Json<api::CreateReleaseRequest>,
) -> Result<(StatusCode, Json<api::ReleaseResponse>), StatusCode> {
    crate::metrics::trigger_received("release");
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    api::create_release(&mut conn, &state.config, &state.notifier, req)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
        .map_err(|e| {
            tracing::error!("Create release error: {e}");
            StatusCode::BAD_REQUEST
        })
}

async fn run_release_handler(
    State(state): State<DeployRouterState>,
    Path(release_id): Path<i64>,
) -> StatusCode {
    crate::metrics::trigger_received("run_release");
    tokio::spawn(async move {
        if let Err(e) =
            release_service::run_release(&state.pool, &state.config, &state.notifier, release_id)
                .await
        {
            tracing::error!(release_id, "Release run error: {e}");
        }
    });
    StatusCode::ACCEPTED
}

async fn sign_handler(
    State(state): State<DeployRouterState>,
    Path(idhash): Path<String>,
) -> Result<Json<api::SignResponse>, StatusCode> {
    crate::metrics::trigger_received("signoff");

    match api::record_signoff(&state, &idhash).await {
        Ok(Some(resp)) => Ok(Json(resp)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Signoff error: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
