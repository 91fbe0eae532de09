//! deploy.release — One instance of "flow F should deploy build B".

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_releases;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_releases)]
pub struct Release {
    pub id: i64,
    pub flow_id: i64,
    pub build_id: i64,
    pub release_date: DateTime<Utc>,
    pub scheduled: Option<DateTime<Utc>>,
    /// Not yet fully delivered. `false` is terminal.
    pub waiting: bool,
    /// In-flight marker, orthogonal to `waiting`. At most one release per
    /// flow holds it at a time.
    pub lock: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deploy_releases)]
pub struct NewRelease {
    pub flow_id: i64,
    pub build_id: i64,
    pub release_date: DateTime<Utc>,
    pub scheduled: Option<DateTime<Utc>>,
    pub waiting: bool,
    pub lock: bool,
}
