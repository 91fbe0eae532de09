//! Post-release webhooks — fired outside the dispatch path.
//!
//! Webhooks for one release go out concurrently with no ordering between
//! them. A hook failing or hanging never blocks or fails the release;
//! each response body is persisted against its webhook row when it
//! arrives.

use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::db::DbPool;
use crate::models::webhook::WebHook;
use crate::schema::deploy_webhooks;

/// All webhooks configured for a flow, in id order.
pub async fn get_webhooks(
    conn: &mut AsyncPgConnection,
    flow_id: i64,
) -> anyhow::Result<Vec<WebHook>> {
    let results = deploy_webhooks::table
        .filter(deploy_webhooks::flow_id.eq(flow_id))
        .order(deploy_webhooks::id.asc())
        .load::<WebHook>(conn)
        .await?;
    Ok(results)
}

/// Persist the response body from a webhook call.
pub async fn set_last_response(
    conn: &mut AsyncPgConnection,
    id: i64,
    body: &str,
) -> anyhow::Result<()> {
    diesel::update(deploy_webhooks::table.find(id))
        .set(deploy_webhooks::last_response.eq(body))
        .execute(conn)
        .await?;
    Ok(())
}

/// Fire all of a flow's webhooks. Returns immediately; each hook runs as
/// its own task.
pub fn fire_webhooks(pool: DbPool, timeout: Duration, flow_id: i64) {
    tokio::spawn(async move {
        let hooks = {
            let mut conn = match pool.get().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(flow_id, "Webhook pool error: {e}");
                    return;
                }
            };
            match get_webhooks(&mut conn, flow_id).await {
                Ok(hooks) => hooks,
                Err(e) => {
                    tracing::warn!(flow_id, "Webhook lookup failed: {e}");
                    return;
                }
            }
        };

        for hook in hooks {
            let pool = pool.clone();
            tokio::spawn(async move {
                call_webhook(pool, hook, timeout).await;
            });
        }
    });
}

/// Issue one webhook request and record its response.
async fn call_webhook(pool: DbPool, hook: WebHook, timeout: Duration) {
    tracing::info!(webhook_id = hook.id, url = %hook.url, method = %hook.method, "Firing webhook");

    let client = reqwest::Client::new();
    let request = if hook.method.eq_ignore_ascii_case("POST") {
        client
            .post(&hook.url)
            .header("Content-Type", &hook.content_type)
            .body(hook.payload.clone())
    } else {
        client.get(&hook.url)
    };

    let body = match tokio::time::timeout(timeout, request.send()).await {
        Ok(Ok(resp)) => {
            crate::metrics::webhook_fired("ok");
            resp.text().await.unwrap_or_default()
        }
        Ok(Err(e)) => {
            crate::metrics::webhook_fired("error");
            tracing::warn!(webhook_id = hook.id, "Webhook failed: {e}");
            return;
        }
        Err(_) => {
            crate::metrics::webhook_fired("timeout");
            tracing::warn!(webhook_id = hook.id, "Webhook timed out after {timeout:?}");
            return;
        }
    };

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(webhook_id = hook.id, "Webhook pool error: {e}");
            return;
        }
    };
    if let Err(e) = set_last_response(&mut conn, hook.id, &body).await {
        tracing::warn!(webhook_id = hook.id, "Webhook response not recorded: {e}");
    }
}
