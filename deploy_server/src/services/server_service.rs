//! Server records — deployable hosts, mutated by checkins and dispatch
//! outcomes.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::server::{NewServer, Server};
use crate::schema::deploy_servers;

use super::NotFound;

/// Get a server by ID.
pub async fn get_server(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<Server> {
    let result = deploy_servers::table
        .find(id)
        .first::<Server>(conn)
        .await
        .optional()?;
    Ok(result.ok_or(NotFound {
        entity: "server",
        id,
    })?)
}

/// Set a server's free-text status. Missing servers are a no-op.
pub async fn update_status(
    conn: &mut AsyncPgConnection,
    id: i64,
    status: &str,
) -> anyhow::Result<()> {
    diesel::update(deploy_servers::table.find(id))
        .set(deploy_servers::status.eq(status))
        .execute(conn)
        .await?;
    Ok(())
}

/// Record agent reachability text for a server. Missing servers are a
/// no-op.
pub async fn update_agent_status(
    conn: &mut AsyncPgConnection,
    id: i64,
    status: &str,
) -> anyhow::Result<()> {
    diesel::update(deploy_servers::table.find(id))
        .set(deploy_servers::agent_status.eq(status))
        .execute(conn)
        .await?;
    Ok(())
}

/// Register an agent checkin: stamp an existing server's checkin time,
/// or create the server on first contact.
pub async fn record_checkin(conn: &mut AsyncPgConnection, hostname: &str) -> anyhow::Result<Server> {
    let now = Utc::now();

    let existing = deploy_servers::table
        .filter(deploy_servers::name.eq(hostname))
        .first::<Server>(conn)
        .await
        .optional()?;

    let server = match existing {
        Some(server) => {
            diesel::update(deploy_servers::table.find(server.id))
                .set(deploy_servers::last_checkin.eq(now))
                .get_result::<Server>(conn)
                .await?
        }
        None => {
            diesel::insert_into(deploy_servers::table)
                .values(NewServer {
                    name: hostname.to_string(),
                    last_checkin: now,
                    last_puppet_run: now,
                    status: String::new(),
                    change: false,
                    agent_status: String::new(),
                })
                .get_result::<Server>(conn)
                .await?
        }
    };

    Ok(server)
}
