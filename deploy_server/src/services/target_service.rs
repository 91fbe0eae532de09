//! Target records — per-server rollout state for a flow.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::target::{DeployState, Target};
use crate::schema::deploy_targets;

/// All targets bound to a flow, in id order. Dispatch relies on this
/// ordering.
pub async fn get_flow_targets(
    conn: &mut AsyncPgConnection,
    flow_id: i64,
) -> anyhow::Result<Vec<Target>> {
    let results = deploy_targets::table
        .filter(deploy_targets::flow_id.eq(flow_id))
        .order(deploy_targets::id.asc())
        .load::<Target>(conn)
        .await?;
    Ok(results)
}

/// Set a target's rollout state. Missing targets are a no-op.
pub async fn update_state(
    conn: &mut AsyncPgConnection,
    id: i64,
    state: DeployState,
) -> anyhow::Result<()> {
    diesel::update(deploy_targets::table.find(id))
        .set(deploy_targets::deploy_state.eq(state.as_i32()))
        .execute(conn)
        .await?;
    Ok(())
}

/// Replace a target's rollout log. Missing targets are a no-op.
pub async fn update_log(conn: &mut AsyncPgConnection, id: i64, log: &str) -> anyhow::Result<()> {
    diesel::update(deploy_targets::table.find(id))
        .set(deploy_targets::log.eq(log))
        .execute(conn)
        .await?;
    Ok(())
}

/// Record the build currently deployed on a target.
pub async fn update_build(
    conn: &mut AsyncPgConnection,
    id: i64,
    build_id: i64,
) -> anyhow::Result<()> {
    diesel::update(deploy_targets::table.find(id))
        .set(deploy_targets::current_build_id.eq(build_id))
        .execute(conn)
        .await?;
    Ok(())
}
