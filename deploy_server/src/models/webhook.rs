//! deploy.webhook — An HTTP callback fired after a flow's release.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_webhooks;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_webhooks)]
pub struct WebHook {
    pub id: i64,
    pub flow_id: i64,
    pub description: String,
    pub url: String,
    /// HTTP method, `GET` or `POST`.
    pub method: String,
    pub content_type: String,
    /// Request body sent verbatim.
    pub payload: String,
    pub last_response: String,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = deploy_webhooks)]
pub struct NewWebHook {
    pub flow_id: i64,
    pub description: String,
    pub url: String,
    pub method: String,
    pub content_type: String,
    pub payload: String,
    pub last_response: String,
}
