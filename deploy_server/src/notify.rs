//! Notification sink — best-effort "tell someone" operations.
//!
//! The core only hands messages to this boundary; delivery transport is
//! an external concern. Failures are logged and never propagated.

use diesel_async::AsyncPgConnection;

use crate::config::DeployConfig;
use crate::services::project_service;

pub struct Notifier {
    client: reqwest::Client,
    slack_host: String,
    slack_token: String,
    default_channel: String,
}

impl Notifier {
    pub fn new(config: &DeployConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            slack_host: config.slack_host.clone(),
            slack_token: config.slack_token.clone(),
            default_channel: config.slack_channel.clone(),
        }
    }

    /// Post a message to a chat channel. Best-effort.
    pub async fn send(&self, channel: &str, text: &str) {
        if self.slack_token.is_empty() {
            tracing::info!(channel, "notify: {text}");
            return;
        }

        let payload = slack_payload(channel, text);
        let url = format!(
            "https://{}/services/hooks/incoming-webhook?token={}",
            self.slack_host, self.slack_token
        );

        let result = self
            .client
            .post(&url)
            .form(&[("payload", payload.to_string())])
            .send()
            .await;

        match result {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(channel, status = %resp.status(), "Notification rejected");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(channel, "Notification failed: {e}"),
        }
    }

    /// Notify a project's channel, honoring its notification settings.
    pub async fn notify_project(
        &self,
        conn: &mut AsyncPgConnection,
        project_id: i64,
        message: &str,
    ) {
        let settings = project_service::get_notification_settings(conn, project_id).await;
        match settings {
            Ok((name, enabled, channel)) => {
                tracing::info!(project = %name, "{message}");
                if enabled {
                    let channel = if channel.is_empty() {
                        &self.default_channel
                    } else {
                        &channel
                    };
                    self.send(channel, message).await;
                }
            }
            Err(e) => tracing::warn!(project_id, "Notification settings lookup failed: {e}"),
        }
    }

    /// Hand an approval request for a release to a signer.
    pub async fn request_signoff(&self, email: &str, sign_url: &str) {
        tracing::info!(email, "Signoff requested: {sign_url}");
        self.send(
            &self.default_channel,
            &format!("Signoff required from {email}: {sign_url}"),
        )
        .await;
    }

    /// Tell the configured recipients about a scheduled release.
    pub async fn notify_schedule(&self, recipients: &[String], flow_name: &str, when: &str) {
        for recipient in recipients {
            tracing::info!(recipient, flow = flow_name, "Release scheduled for {when}");
        }
        self.send(
            &self.default_channel,
            &format!("Release for {flow_name} scheduled for {when}"),
        )
        .await;
    }
}

/// Slack incoming-webhook attachment payload.
fn slack_payload(channel: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "channel": channel,
        "username": "deploy",
        "icon_emoji": ":greenrocket:",
        "attachments": [{
            "fallback": text,
            "pretext": text,
            "color": "#0000D0",
            "fields": [],
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_channel_and_text() {
        let p = slack_payload("#mychan", "build #1 successful");
        assert_eq!(p["channel"], "#mychan");
        assert_eq!(p["attachments"][0]["pretext"], "build #1 successful");
        assert_eq!(p["attachments"][0]["fallback"], "build #1 successful");
    }
}
