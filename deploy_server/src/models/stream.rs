//! deploy.stream — A package channel with a push command.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_streams;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_streams)]
pub struct ReleaseStream {
    pub id: i64,
    pub name: String,
    /// Shell command template with a single `%s` placeholder for the
    /// artifact path.
    pub push_command: String,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = deploy_streams)]
pub struct NewReleaseStream {
    pub name: String,
    pub push_command: String,
}
