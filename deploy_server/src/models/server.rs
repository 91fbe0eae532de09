//! deploy.server — A deployable host running the remote agent.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_servers;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_servers)]
pub struct Server {
    pub id: i64,
    /// Hostname, also the agent address.
    pub name: String,
    pub last_checkin: DateTime<Utc>,
    pub last_puppet_run: DateTime<Utc>,
    pub status: String,
    pub change: bool,
    /// Last known agent reachability, free text.
    pub agent_status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deploy_servers)]
pub struct NewServer {
    pub name: String,
    pub last_checkin: DateTime<Utc>,
    pub last_puppet_run: DateTime<Utc>,
    pub status: String,
    pub change: bool,
    pub agent_status: String,
}
