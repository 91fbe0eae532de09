//! Release pipeline — creation, signoff/schedule gates, staleness
//! cleanup, and dispatch.
//!
//! A release moves Waiting(unlocked) → Waiting(locked) → Delivered.
//! `waiting = false` is terminal; `lock` is the orthogonal in-flight
//! flag and at most one release per flow holds it. State always lives in
//! the store: every step reloads rather than trusting an in-memory copy,
//! so concurrent writers are tolerated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::config::DeployConfig;
use crate::db::DbPool;
use crate::models::flow::{ReleaseFlow, StreamMode};
use crate::models::release::{NewRelease, Release};
use crate::models::signoff::{NewReleaseSignoff, ReleaseSignoff};
use crate::notify::Notifier;
use crate::schema::{deploy_releases, deploy_signoffs};
use crate::services::{
    build_service, dispatcher, flow_service, webhook_service, NotFound,
};

/// Get a release by ID.
pub async fn get_release(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<Release> {
    let result = deploy_releases::table
        .find(id)
        .first::<Release>(conn)
        .await
        .optional()?;
    Ok(result.ok_or(NotFound {
        entity: "release",
        id,
    })?)
}

/// All releases matching the given waiting/lock flags, in id order.
pub async fn list_releases(
    conn: &mut AsyncPgConnection,
    waiting: bool,
    lock: bool,
) -> anyhow::Result<Vec<Release>> {
    let results = deploy_releases::table
        .filter(deploy_releases::waiting.eq(waiting))
        .filter(deploy_releases::lock.eq(lock))
        .order(deploy_releases::id.asc())
        .load::<Release>(conn)
        .await?;
    Ok(results)
}

/// Count a flow's releases matching the given waiting/lock flags.
pub async fn count_releases(
    conn: &mut AsyncPgConnection,
    flow_id: i64,
    waiting: bool,
    lock: bool,
) -> anyhow::Result<i64> {
    let count: i64 = deploy_releases::table
        .filter(deploy_releases::flow_id.eq(flow_id))
        .filter(deploy_releases::waiting.eq(waiting))
        .filter(deploy_releases::lock.eq(lock))
        .count()
        .get_result(conn)
        .await?;
    Ok(count)
}

/// The flow's newest waiting release, if any.
pub async fn get_next_flow_release(
    conn: &mut AsyncPgConnection,
    flow_id: i64,
) -> anyhow::Result<Option<Release>> {
    let result = deploy_releases::table
        .filter(deploy_releases::flow_id.eq(flow_id))
        .filter(deploy_releases::waiting.eq(true))
        .order(deploy_releases::release_date.desc())
        .first::<Release>(conn)
        .await
        .optional()?;
    Ok(result)
}

/// The flow's newest delivered release, if any.
pub async fn get_last_flow_release(
    conn: &mut AsyncPgConnection,
    flow_id: i64,
) -> anyhow::Result<Option<Release>> {
    let result = deploy_releases::table
        .filter(deploy_releases::flow_id.eq(flow_id))
        .filter(deploy_releases::waiting.eq(false))
        .order(deploy_releases::release_date.desc())
        .first::<Release>(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Set a release's lock flag. Missing releases are a no-op.
pub async fn update_release_locks(
    conn: &mut AsyncPgConnection,
    id: i64,
    lock: bool,
) -> anyhow::Result<()> {
    diesel::update(deploy_releases::table.find(id))
        .set(deploy_releases::lock.eq(lock))
        .execute(conn)
        .await?;
    Ok(())
}

/// Set a release's lock and waiting flags together. Missing releases
/// are a no-op.
pub async fn update_release_state(
    conn: &mut AsyncPgConnection,
    id: i64,
    lock: bool,
    waiting: bool,
) -> anyhow::Result<()> {
    diesel::update(deploy_releases::table.find(id))
        .set((
            deploy_releases::lock.eq(lock),
            deploy_releases::waiting.eq(waiting),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

// ── Signoffs ──

/// Count of collected approvals for a release.
pub async fn signed_count(conn: &mut AsyncPgConnection, release_id: i64) -> anyhow::Result<i64> {
    let count: i64 = deploy_signoffs::table
        .filter(deploy_signoffs::release_id.eq(release_id))
        .filter(deploy_signoffs::signed.eq(true))
        .count()
        .get_result(conn)
        .await?;
    Ok(count)
}

/// Look up a signoff by its approval token.
pub async fn find_signoff_by_token(
    conn: &mut AsyncPgConnection,
    token: &str,
) -> anyhow::Result<Option<ReleaseSignoff>> {
    let result = deploy_signoffs::table
        .filter(deploy_signoffs::idhash.eq(token))
        .first::<ReleaseSignoff>(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Flip a signoff to signed. Signing twice is harmless.
pub async fn mark_signed(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<()> {
    diesel::update(deploy_signoffs::table.find(id))
        .set(deploy_signoffs::signed.eq(true))
        .execute(conn)
        .await?;
    Ok(())
}

// ── Gates ──

/// A release may proceed once its scheduled time, if any, has passed.
pub fn check_schedule(release: &Release, now: DateTime<Utc>) -> bool {
    match release.scheduled {
        Some(when) => now >= when,
        None => true,
    }
}

/// Whether collected approvals satisfy the flow's quorum. A quorum of
/// zero means every configured signer must sign; with no signers that is
/// trivially satisfied.
pub fn quorum_met(quorum: i32, signer_count: usize, signed: i64) -> bool {
    if quorum == 0 {
        signed >= signer_count as i64
    } else {
        signed >= quorum as i64
    }
}

/// Signoff gate for a release under the given flow.
pub async fn check_signoff(
    conn: &mut AsyncPgConnection,
    release_id: i64,
    flow: &ReleaseFlow,
) -> anyhow::Result<bool> {
    if !flow.require_signoff {
        return Ok(true);
    }
    let signed = signed_count(conn, release_id).await?;
    Ok(quorum_met(flow.quorum, flow.signoff_list().len(), signed))
}

// ── Staleness ──

/// A waiting release is superseded when a newer waiting release exists
/// for its flow, or the flow's newest delivered release postdates it.
pub fn is_superseded(
    release: &Release,
    newest_waiting: Option<&Release>,
    newest_delivered: Option<&Release>,
) -> bool {
    if let Some(waiting) = newest_waiting {
        if waiting.id != release.id && waiting.release_date > release.release_date {
            return true;
        }
    }
    if let Some(delivered) = newest_delivered {
        if delivered.release_date > release.release_date {
            return true;
        }
    }
    false
}

/// Retire a release if it has been superseded. Superseded releases never
/// dispatch; they are marked delivered-without-dispatch.
pub async fn clean_stale_release(
    conn: &mut AsyncPgConnection,
    release: &Release,
) -> anyhow::Result<bool> {
    let newest_waiting = get_next_flow_release(conn, release.flow_id).await?;
    let newest_delivered = get_last_flow_release(conn, release.flow_id).await?;

    if !is_superseded(release, newest_waiting.as_ref(), newest_delivered.as_ref()) {
        return Ok(false);
    }

    tracing::info!(release_id = release.id, flow_id = release.flow_id, "Release superseded");
    update_release_state(conn, release.id, false, false).await?;
    crate::metrics::release_event("superseded");
    Ok(true)
}

// ── Creation ──

/// Create a release of a build through a flow. Collects signoff rows and
/// schedule notifications as the flow requires.
pub async fn create_release(
    conn: &mut AsyncPgConnection,
    config: &DeployConfig,
    notifier: &Notifier,
    build_id: i64,
    flow_id: i64,
    scheduled: Option<DateTime<Utc>>,
) -> anyhow::Result<Release> {
    let flow = flow_service::get_flow(conn, flow_id).await?;

    let release = diesel::insert_into(deploy_releases::table)
        .values(NewRelease {
            flow_id,
            build_id,
            release_date: Utc::now(),
            scheduled,
            waiting: true,
            lock: false,
        })
        .get_result::<Release>(conn)
        .await?;

    crate::metrics::release_event("created");
    tracing::info!(
        release_id = release.id,
        build_id,
        flow_id,
        "Release created"
    );

    if let Some(when) = scheduled {
        notifier
            .notify_schedule(
                &flow.notify_list(),
                &flow.name,
                &when.format("%Y-%m-%d %H:%M UTC").to_string(),
            )
            .await;
    }

    if flow.require_signoff {
        for signer in flow.signoff_list() {
            let token = uuid::Uuid::new_v4().simple().to_string();
            diesel::insert_into(deploy_signoffs::table)
                .values(NewReleaseSignoff {
                    release_id: release.id,
                    signature: signer.clone(),
                    idhash: token.clone(),
                    signed: false,
                })
                .execute(conn)
                .await?;

            let sign_url = format!("{}/api/sign/{}", config.base_url, token);
            notifier.request_signoff(&signer, &sign_url).await;
        }
    }

    Ok(release)
}

// ── Dispatch ──

/// Run a release if its gates are satisfied.
///
/// Reloads first and no-ops on anything no longer waiting, which makes
/// concurrent invocations idempotent. Dispatch failures land on targets,
/// not on the release; the lock is always dropped and webhooks always
/// fire once the release is delivered.
pub async fn run_release(
    pool: &DbPool,
    config: &DeployConfig,
    notifier: &Arc<Notifier>,
    release_id: i64,
) -> anyhow::Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

    let release = get_release(&mut conn, release_id).await?;
    if !release.waiting {
        return Ok(());
    }

    let flow = flow_service::get_flow(&mut conn, release.flow_id).await?;

    if !check_schedule(&release, Utc::now())
        || !check_signoff(&mut conn, release.id, &flow).await?
    {
        // Gate not satisfied yet; the next tick retries.
        return Ok(());
    }

    update_release_locks(&mut conn, release.id, true).await?;
    crate::metrics::release_event("locked");

    notifier
        .notify_project(
            &mut conn,
            flow.project_id,
            &format!("Running release {} for flow {}", release.id, flow.name),
        )
        .await;

    let build = build_service::get_build(&mut conn, release.build_id).await?;

    match flow.mode() {
        StreamMode::StreamOnly => {
            if let Err(e) =
                stream_release(&mut conn, config, notifier, &release, &flow, &build).await
            {
                tracing::error!(release_id, "Stream push error: {e}");
            }
        }
        StreamMode::TargetOnly => {
            if let Err(e) =
                dispatcher::push_targets(&mut conn, config, notifier, &release, &flow).await
            {
                tracing::error!(release_id, "Target dispatch error: {e}");
            }
        }
        StreamMode::StreamAndTarget => {
            // Stream first. The channels are independent, so a stream
            // failure does not stop target dispatch.
            if let Err(e) =
                stream_release(&mut conn, config, notifier, &release, &flow, &build).await
            {
                tracing::error!(release_id, "Stream push error: {e}");
            }
            if let Err(e) =
                dispatcher::push_targets(&mut conn, config, notifier, &release, &flow).await
            {
                tracing::error!(release_id, "Target dispatch error: {e}");
            }
        }
    }

    update_release_state(&mut conn, release.id, false, false).await?;
    crate::metrics::release_event("delivered");

    webhook_service::fire_webhooks(
        pool.clone(),
        Duration::from_secs(config.webhook_timeout_secs),
        flow.id,
    );

    Ok(())
}

/// Push the release's artifact to the flow's stream via the configured
/// shell command.
pub async fn stream_release(
    conn: &mut AsyncPgConnection,
    config: &DeployConfig,
    notifier: &Notifier,
    release: &Release,
    flow: &ReleaseFlow,
    build: &crate::models::build::Build,
) -> anyhow::Result<()> {
    let stream_id = flow
        .stream_id
        .ok_or_else(|| anyhow::anyhow!("flow {} has no stream configured", flow.id))?;
    let stream = flow_service::get_stream(conn, stream_id).await?;

    let path = format!(
        "{}/{}",
        config.package_dir.trim_end_matches('/'),
        build.build_file
    );
    let command = render_push_command(&stream.push_command, &path);

    tracing::info!(release_id = release.id, command = %command, "Pushing to stream");

    let output = tokio::process::Command::new("sh")
        .args(["-c", &command])
        .output()
        .await?;

    if output.status.success() {
        notifier
            .notify_project(
                conn,
                flow.project_id,
                &format!("Release {} pushed to stream {}", release.id, stream.name),
            )
            .await;
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(release_id = release.id, "Stream push failed: {stderr}");
        notifier
            .notify_project(
                conn,
                flow.project_id,
                &format!("Stream push failed for release {}", release.id),
            )
            .await;
    }

    Ok(())
}

/// Substitute the artifact path into a stream's push command template.
pub fn render_push_command(template: &str, path: &str) -> String {
    template.replacen("%s", path, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn release(id: i64, date: DateTime<Utc>, scheduled: Option<DateTime<Utc>>) -> Release {
        Release {
            id,
            flow_id: 1,
            build_id: 1,
            release_date: date,
            scheduled,
            waiting: true,
            lock: false,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_459_500_000 + secs, 0).single().unwrap()
    }

    #[test]
    fn schedule_gate_unscheduled() {
        let r = release(1, at(0), None);
        assert!(check_schedule(&r, at(0)));
    }

    #[test]
    fn schedule_gate_future() {
        let r = release(1, at(0), Some(at(100)));
        assert!(!check_schedule(&r, at(50)));
        assert!(check_schedule(&r, at(100)));
        assert!(check_schedule(&r, at(150)));
    }

    #[test]
    fn quorum_explicit() {
        assert!(!quorum_met(2, 3, 1));
        assert!(quorum_met(2, 3, 2));
        assert!(quorum_met(2, 3, 3));
    }

    #[test]
    fn quorum_zero_means_all() {
        assert!(!quorum_met(0, 3, 2));
        assert!(quorum_met(0, 3, 3));
    }

    #[test]
    fn quorum_zero_with_no_signers_is_satisfied() {
        assert!(quorum_met(0, 0, 0));
    }

    #[test]
    fn quorum_is_monotonic_in_signed_count() {
        // Signoffs only flip false -> true, so a satisfied gate stays
        // satisfied as the count grows.
        for signed in 2..10 {
            assert!(quorum_met(2, 5, signed));
        }
    }

    #[test]
    fn superseded_by_newer_waiting() {
        let old = release(1, at(0), None);
        let newer = release(2, at(10), None);
        assert!(is_superseded(&old, Some(&newer), None));
        // The newest waiting release itself is not stale.
        assert!(!is_superseded(&newer, Some(&newer), None));
    }

    #[test]
    fn superseded_by_newer_delivery() {
        let old = release(1, at(0), None);
        let delivered = Release {
            waiting: false,
            ..release(2, at(10), None)
        };
        assert!(is_superseded(&old, None, Some(&delivered)));
    }

    #[test]
    fn not_superseded_by_older_delivery() {
        let current = release(2, at(10), None);
        let delivered = Release {
            waiting: false,
            ..release(1, at(0), None)
        };
        assert!(!is_superseded(&current, None, Some(&delivered)));
    }

    #[test]
    fn push_command_substitution() {
        assert_eq!(
            render_push_command("repo-push %s qa", "/srv/packages/pkg_1.0_amd64.deb"),
            "repo-push /srv/packages/pkg_1.0_amd64.deb qa"
        );
        // No placeholder: command runs as-is.
        assert_eq!(render_push_command("push push push", "/p"), "push push push");
    }
}
