//! deploy.signoff — One required human approval for a release.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_signoffs;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_signoffs)]
pub struct ReleaseSignoff {
    pub id: i64,
    pub release_id: i64,
    /// Signer identifier (email address).
    pub signature: String,
    /// Unique approval token for the signoff callback.
    pub idhash: String,
    pub signed: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deploy_signoffs)]
pub struct NewReleaseSignoff {
    pub release_id: i64,
    pub signature: String,
    pub idhash: String,
    pub signed: bool,
}
