//! Release scheduler — the periodic tick that drives waiting releases.
//!
//! Each tick: retire superseded releases, skip flows that already have a
//! release in flight, then hand every remaining waiting release to
//! `run_release` as its own task. One bad release never stalls the tick.

use std::sync::Arc;
use std::time::Duration;

use crate::config::DeployConfig;
use crate::db::DbPool;
use crate::notify::Notifier;
use crate::services::release_service;

/// Run the scheduler loop forever. Spawned as a background tokio task.
pub async fn run_scheduler(pool: DbPool, config: DeployConfig, notifier: Arc<Notifier>) {
    tracing::info!(
        interval_secs = config.tick_interval_secs,
        "Release scheduler started"
    );

    loop {
        if let Err(e) = tick(&pool, &config, &notifier).await {
            tracing::error!("Scheduler tick error: {e}");
        }
        tokio::time::sleep(Duration::from_secs(config.tick_interval_secs)).await;
    }
}

/// One scheduler pass over the waiting, unlocked releases.
pub async fn tick(
    pool: &DbPool,
    config: &DeployConfig,
    notifier: &Arc<Notifier>,
) -> anyhow::Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

    let releases = release_service::list_releases(&mut conn, true, false).await?;
    for release in &releases {
        if let Err(e) = release_service::clean_stale_release(&mut conn, release).await {
            tracing::warn!(release_id = release.id, "Stale check failed: {e}");
        }
    }

    // Reload: the stale pass above retires rows from the first listing.
    let releases = release_service::list_releases(&mut conn, true, false).await?;

    for release in releases {
        // At most one in-flight release per flow.
        let in_flight =
            release_service::count_releases(&mut conn, release.flow_id, true, true).await?;
        if in_flight > 0 {
            tracing::debug!(
                release_id = release.id,
                flow_id = release.flow_id,
                "Flow has a release in flight, skipping"
            );
            continue;
        }

        let pool = pool.clone();
        let config = config.clone();
        let notifier = notifier.clone();
        tokio::spawn(async move {
            if let Err(e) =
                release_service::run_release(&pool, &config, &notifier, release.id).await
            {
                tracing::error!(release_id = release.id, "Release run error: {e}");
            }
        });
    }

    Ok(())
}
