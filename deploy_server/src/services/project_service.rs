//! Project lookups. Projects are managed through the UI; the core only
//! reads them.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::project::Project;
use crate::schema::deploy_projects;

use super::NotFound;

/// Get a project by ID.
pub async fn get_project(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<Project> {
    let result = deploy_projects::table
        .find(id)
        .first::<Project>(conn)
        .await
        .optional()?;
    Ok(result.ok_or(NotFound {
        entity: "project",
        id,
    })?)
}

/// Find a project by its identity token.
pub async fn find_by_idhash(
    conn: &mut AsyncPgConnection,
    idhash: &str,
) -> anyhow::Result<Option<Project>> {
    let result = deploy_projects::table
        .filter(deploy_projects::idhash.eq(idhash))
        .first::<Project>(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Get a project's notification settings: (name, enabled, channel).
pub async fn get_notification_settings(
    conn: &mut AsyncPgConnection,
    id: i64,
) -> anyhow::Result<(String, bool, String)> {
    let result = deploy_projects::table
        .find(id)
        .select((
            deploy_projects::name,
            deploy_projects::notifications,
            deploy_projects::slack_channel,
        ))
        .first::<(String, bool, String)>(conn)
        .await
        .optional()?;
    Ok(result.ok_or(NotFound {
        entity: "project",
        id,
    })?)
}
