//! Release-flow lookups. Flows are managed through the UI; the core only
//! reads them.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::flow::ReleaseFlow;
use crate::models::stream::ReleaseStream;
use crate::schema::{deploy_flows, deploy_streams};

use super::NotFound;

/// Get a flow by ID.
pub async fn get_flow(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<ReleaseFlow> {
    let result = deploy_flows::table
        .find(id)
        .first::<ReleaseFlow>(conn)
        .await
        .optional()?;
    Ok(result.ok_or(NotFound { entity: "flow", id })?)
}

/// All auto-release flows for a project.
pub async fn get_auto_flows(
    conn: &mut AsyncPgConnection,
    project_id: i64,
) -> anyhow::Result<Vec<ReleaseFlow>> {
    let results = deploy_flows::table
        .filter(deploy_flows::project_id.eq(project_id))
        .filter(deploy_flows::auto_release.eq(true))
        .order(deploy_flows::id.asc())
        .load::<ReleaseFlow>(conn)
        .await?;
    Ok(results)
}

/// Get a release stream by ID.
pub async fn get_stream(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<ReleaseStream> {
    let result = deploy_streams::table
        .find(id)
        .first::<ReleaseStream>(conn)
        .await
        .optional()?;
    Ok(result.ok_or(NotFound {
        entity: "stream",
        id,
    })?)
}
