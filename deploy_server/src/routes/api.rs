//! REST API for builds, releases, and signoffs.

use chrono::{DateTime, Utc};
use diesel_async::AsyncPgConnection;
use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;
use crate::models::build::BuildState;
use crate::notify::Notifier;
use crate::routes::DeployRouterState;
use crate::services::{build_service, flow_service, project_service, release_service};

// ── Build API ──

/// Request body for manually triggering a build.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub project_id: i64,
}

/// Response for a triggered build.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub id: i64,
    pub result: String,
}

/// Manually trigger a build for a project. An already-queued build is
/// returned instead of creating a duplicate.
pub async fn trigger_build(
    conn: &mut AsyncPgConnection,
    project_id: i64,
) -> anyhow::Result<TriggerResponse> {
    let project = project_service::get_project(conn, project_id).await?;

    if let Some(existing) = build_service::find_queued_build(conn, project.id).await? {
        return Ok(TriggerResponse {
            id: existing.id,
            result: "Already building".to_string(),
        });
    }

    let build = build_service::create_build(conn, project.id).await?;
    Ok(TriggerResponse {
        id: build.id,
        result: "Building".to_string(),
    })
}

/// JSON view of a build with its accumulated log, for tailing.
#[derive(Debug, Serialize)]
pub struct BuildJson {
    pub id: i64,
    pub project_id: i64,
    pub state: i32,
    pub state_name: String,
    pub log: String,
    pub build_file: String,
    pub build_time: DateTime<Utc>,
}

/// Get a build by ID.
pub async fn get_build(conn: &mut AsyncPgConnection, build_id: i64) -> anyhow::Result<BuildJson> {
    let build = build_service::get_build(conn, build_id).await?;

    let state_name = BuildState::from_i32(build.state)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| build.state.to_string());

    Ok(BuildJson {
        id: build.id,
        project_id: build.project_id,
        state: build.state,
        state_name,
        log: build.log,
        build_file: build.build_file,
        build_time: build.build_time,
    })
}

// ── Release API ──

/// Request body for creating a release.
#[derive(Debug, Deserialize)]
pub struct CreateReleaseRequest {
    pub build_id: i64,
    pub flow_id: i64,
    pub scheduled: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub id: i64,
}

/// Create a release for (build, flow), optionally scheduled.
pub async fn create_release(
    conn: &mut AsyncPgConnection,
    config: &DeployConfig,
    notifier: &Notifier,
    req: CreateReleaseRequest,
) -> anyhow::Result<ReleaseResponse> {
    // Both rows must exist before a release binds them.
    build_service::get_build(conn, req.build_id).await?;

    let release = release_service::create_release(
        conn,
        config,
        notifier,
        req.build_id,
        req.flow_id,
        req.scheduled,
    )
    .await?;

    Ok(ReleaseResponse { id: release.id })
}

// ── Signoff API ──

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub release_id: i64,
    pub signer: String,
    pub signed: bool,
}

/// Record an approval by its token. When the quorum is reached for a
/// still-waiting release, it runs immediately instead of waiting for the
/// next tick.
pub async fn record_signoff(
    state: &DeployRouterState,
    token: &str,
) -> anyhow::Result<Option<SignResponse>> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

    let signoff = match release_service::find_signoff_by_token(&mut conn, token).await? {
        Some(signoff) => signoff,
        None => return Ok(None),
    };

    release_service::mark_signed(&mut conn, signoff.id).await?;
    tracing::info!(
        release_id = signoff.release_id,
        signer = %signoff.signature,
        "Signoff recorded"
    );

    let release = release_service::get_release(&mut conn, signoff.release_id).await?;
    if release.waiting {
        let flow = flow_service::get_flow(&mut conn, release.flow_id).await?;
        if release_service::check_signoff(&mut conn, release.id, &flow).await? {
            let pool = state.pool.clone();
            let config = state.config.clone();
            let notifier = state.notifier.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    release_service::run_release(&pool, &config, &notifier, release.id).await
                {
                    tracing::error!(release_id = release.id, "Release run error: {e}");
                }
            });
        }
    }

    Ok(Some(SignResponse {
        release_id: signoff.release_id,
        signer: signoff.signature,
        signed: true,
    }))
}
