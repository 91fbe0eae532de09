//! Build records and the per-repository build-number counter.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::build::{Build, BuildState, NewBuild};
use crate::schema::{deploy_build_numbers, deploy_builds};

use super::NotFound;

/// Create a new queued build for a project.
pub async fn create_build(conn: &mut AsyncPgConnection, project_id: i64) -> anyhow::Result<Build> {
    let new_build = NewBuild {
        project_id,
        build_time: chrono::Utc::now(),
        state: BuildState::Queued.as_i32(),
        log: String::new(),
        build_file: String::new(),
    };

    let result = diesel::insert_into(deploy_builds::table)
        .values(&new_build)
        .get_result::<Build>(conn)
        .await?;

    crate::metrics::build_state_changed("queued");
    tracing::info!(build_id = result.id, project_id, "Build created");

    Ok(result)
}

/// Get a build by ID.
pub async fn get_build(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<Build> {
    let result = deploy_builds::table
        .find(id)
        .first::<Build>(conn)
        .await
        .optional()?;
    Ok(result.ok_or(NotFound { entity: "build", id })?)
}

/// Replace a build's accumulated log. Missing builds are a no-op.
pub async fn update_log(conn: &mut AsyncPgConnection, id: i64, log: &str) -> anyhow::Result<()> {
    diesel::update(deploy_builds::table.find(id))
        .set(deploy_builds::log.eq(log))
        .execute(conn)
        .await?;
    Ok(())
}

/// Set a build's state. Missing builds are a no-op.
pub async fn set_state(
    conn: &mut AsyncPgConnection,
    id: i64,
    state: BuildState,
) -> anyhow::Result<()> {
    diesel::update(deploy_builds::table.find(id))
        .set(deploy_builds::state.eq(state.as_i32()))
        .execute(conn)
        .await?;

    crate::metrics::build_state_changed(state.as_str());
    Ok(())
}

/// Record a build's artifact filename. Missing builds are a no-op.
pub async fn set_build_file(
    conn: &mut AsyncPgConnection,
    id: i64,
    file: &str,
) -> anyhow::Result<()> {
    diesel::update(deploy_builds::table.find(id))
        .set(deploy_builds::build_file.eq(file))
        .execute(conn)
        .await?;
    Ok(())
}

/// All queued builds, oldest first.
pub async fn list_queued(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<Build>> {
    let results = deploy_builds::table
        .filter(deploy_builds::state.eq(BuildState::Queued.as_i32()))
        .order(deploy_builds::id.asc())
        .load::<Build>(conn)
        .await?;
    Ok(results)
}

/// A project's oldest queued build, if any.
pub async fn find_queued_build(
    conn: &mut AsyncPgConnection,
    project_id: i64,
) -> anyhow::Result<Option<Build>> {
    let result = deploy_builds::table
        .filter(deploy_builds::project_id.eq(project_id))
        .filter(deploy_builds::state.eq(BuildState::Queued.as_i32()))
        .order(deploy_builds::id.asc())
        .first::<Build>(conn)
        .await
        .optional()?;
    Ok(result)
}

// ── Build numbers ──

/// Current build number for a repository, if a counter row exists.
pub async fn find_build_number(
    conn: &mut AsyncPgConnection,
    repo: &str,
) -> anyhow::Result<Option<i64>> {
    let result = deploy_build_numbers::table
        .filter(deploy_build_numbers::package.eq(repo))
        .select(deploy_build_numbers::build_num)
        .first::<i64>(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Current build number for a repository; zero when unknown.
pub async fn get_build_number(conn: &mut AsyncPgConnection, repo: &str) -> anyhow::Result<i64> {
    Ok(find_build_number(conn, repo).await?.unwrap_or(0))
}

/// Set a repository's build number. With `create`, inserts a fresh
/// counter row and fails if one exists; otherwise updates are a no-op
/// for unknown repositories.
pub async fn set_build_number(
    conn: &mut AsyncPgConnection,
    repo: &str,
    num: i64,
    create: bool,
) -> anyhow::Result<()> {
    if create {
        diesel::insert_into(deploy_build_numbers::table)
            .values((
                deploy_build_numbers::package.eq(repo),
                deploy_build_numbers::build_num.eq(num),
            ))
            .execute(conn)
            .await?;
    } else {
        diesel::update(
            deploy_build_numbers::table.filter(deploy_build_numbers::package.eq(repo)),
        )
        .set(deploy_build_numbers::build_num.eq(num))
        .execute(conn)
        .await?;
    }
    Ok(())
}
