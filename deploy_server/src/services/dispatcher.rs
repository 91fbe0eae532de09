//! Target dispatcher — fans a locked release out to its flow's servers.
//!
//! Targets are processed one at a time in store order; each target's
//! stop → install → post-action sequence completes before the next
//! starts. One target's failure is recorded on that target and never
//! aborts the rest. The release itself is considered delivered by the
//! caller regardless of per-target outcomes.

use diesel_async::AsyncPgConnection;

use crate::agent::AgentClient;
use crate::config::DeployConfig;
use crate::models::flow::ReleaseFlow;
use crate::models::release::Release;
use crate::models::target::{DeployState, Target};
use crate::notify::Notifier;
use crate::services::{build_service, project_service, server_service, target_service};

/// Deploy a release to every target bound to the flow.
pub async fn push_targets(
    conn: &mut AsyncPgConnection,
    config: &DeployConfig,
    notifier: &Notifier,
    release: &Release,
    flow: &ReleaseFlow,
) -> anyhow::Result<()> {
    let project = project_service::get_project(conn, flow.project_id).await?;
    let build = build_service::get_build(conn, release.build_id).await?;
    let targets = target_service::get_flow_targets(conn, flow.id).await?;

    let package = if project.package_name.is_empty() {
        project.repo_name()
    } else {
        project.package_name.clone()
    };
    let url = format!(
        "{}/{}",
        config.package_url.trim_end_matches('/'),
        build.build_file
    );

    for target in targets {
        if let Err(e) =
            push_target(conn, config, notifier, flow, &target, &package, &url, build.id).await
        {
            // Transport or protocol failure mid-sequence. Record it on the
            // target and the server, then carry on with the rest.
            let text = format!("{e:#}");
            tracing::warn!(target_id = target.id, "Target dispatch failed: {text}");

            let _ = target_service::update_state(conn, target.id, DeployState::Failed).await;
            let _ = target_service::update_log(conn, target.id, &text).await;
            let _ = server_service::update_agent_status(conn, target.server_id, &text).await;
            crate::metrics::target_deployed("failed");

            notifier
                .notify_project(
                    conn,
                    flow.project_id,
                    &format!("Deployment error on target {}: {text}", target.id),
                )
                .await;
        }
    }

    Ok(())
}

/// One target's full deployment sequence.
#[allow(clippy::too_many_arguments)]
async fn push_target(
    conn: &mut AsyncPgConnection,
    config: &DeployConfig,
    notifier: &Notifier,
    flow: &ReleaseFlow,
    target: &Target,
    package: &str,
    url: &str,
    build_id: i64,
) -> anyhow::Result<()> {
    let server = server_service::get_server(conn, target.server_id).await?;

    target_service::update_state(conn, target.id, DeployState::InProgress).await?;
    notifier
        .notify_project(
            conn,
            flow.project_id,
            &format!("Deployment started: server {} for flow {}", server.name, flow.name),
        )
        .await;

    let client = AgentClient::new(
        &server.name,
        config.agent_port,
        &config.agent_auth,
        &config.agent_secret,
    )?;

    // Open the session with a signed probe; an unreachable agent fails
    // here before any service is touched.
    let info = client.get_info().await?;
    if let Some(error) = info.error {
        anyhow::bail!("agent error: {error}");
    }

    let mut log = String::new();
    let mut stopped = false;

    if flow.service_pre_stop {
        let resp = client.stop_all().await?;
        log.push_str(&resp.combined_output());
        stopped = true;
    }

    let resp = client.install_package(package, url).await?;

    if resp.is_failure() {
        log.push_str(&resp.combined_output());
        target_service::update_state(conn, target.id, DeployState::Failed).await?;
        target_service::update_log(conn, target.id, &log).await?;
        crate::metrics::target_deployed("failed");

        notifier
            .notify_project(
                conn,
                flow.project_id,
                &format!("Deployment failed: server {}", server.name),
            )
            .await;

        // Leave the host serving even though the install failed.
        if stopped {
            if let Err(e) = client.start_all().await {
                tracing::warn!(server = %server.name, "Service restart after failure: {e}");
            }
        }
        return Ok(());
    }

    log.push_str(&resp.combined_output());

    if flow.puppet_run {
        let resp = client.puppet_run().await?;
        log.push_str(&resp.combined_output());
    }

    if stopped {
        let resp = client.start_all().await?;
        log.push_str(&resp.combined_output());
    } else if flow.service_restart {
        let resp = client.restart_all().await?;
        log.push_str(&resp.combined_output());
    }

    target_service::update_state(conn, target.id, DeployState::Success).await?;
    target_service::update_log(conn, target.id, &log).await?;
    target_service::update_build(conn, target.id, build_id).await?;
    crate::metrics::target_deployed("success");

    notifier
        .notify_project(
            conn,
            flow.project_id,
            &format!("Deployment successful: server {}", server.name),
        )
        .await;

    Ok(())
}
