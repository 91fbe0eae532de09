//! Deploy platform configuration — loaded from environment variables.

#[derive(Clone, Debug)]
pub struct DeployConfig {
    /// Base URL for links embedded in notifications.
    pub base_url: String,
    /// Builder program spawned once per build.
    pub build_command: String,
    /// Directory the builder checks sources out into.
    pub workspace_dir: String,
    /// Shared archive directory finished packages are moved to.
    pub package_dir: String,
    /// Public URL prefix agents download packages from.
    pub package_url: String,
    /// Seconds between build-queue polls.
    pub poll_interval_secs: u64,
    /// Per-project cooldown window between build starts, in seconds.
    pub build_cooldown_secs: u64,
    /// Seconds between release-scheduler ticks.
    pub tick_interval_secs: u64,
    /// Shared agent authorization token.
    pub agent_auth: String,
    /// HMAC key for agent request signing.
    pub agent_secret: String,
    /// Port the deployment agents listen on.
    pub agent_port: u16,
    /// Slack incoming-webhook host and token for notifications.
    pub slack_host: String,
    pub slack_token: String,
    /// Fallback notification channel.
    pub slack_channel: String,
    /// Wall-clock timeout for a single webhook call, in seconds.
    pub webhook_timeout_secs: u64,
}

impl DeployConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("DEPLOY_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let build_command = std::env::var("DEPLOY_BUILD_COMMAND")
            .unwrap_or_else(|_| "bin/build_package".to_string());
        let workspace_dir =
            std::env::var("DEPLOY_WORKSPACE").unwrap_or_else(|_| "/workspace".to_string());
        let package_dir =
            std::env::var("DEPLOY_PACKAGE_DIR").unwrap_or_else(|_| "/srv/packages".to_string());
        let package_url = std::env::var("DEPLOY_PACKAGE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/packages".to_string());
        let poll_interval_secs = std::env::var("DEPLOY_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let build_cooldown_secs = std::env::var("DEPLOY_BUILD_COOLDOWN")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1800);
        let tick_interval_secs = std::env::var("DEPLOY_TICK_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let agent_auth = std::env::var("DEPLOY_AGENT_AUTH").unwrap_or_default();
        let agent_secret = std::env::var("DEPLOY_AGENT_SECRET").unwrap_or_default();
        let agent_port = std::env::var("DEPLOY_AGENT_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2400);
        let slack_host =
            std::env::var("DEPLOY_SLACK_HOST").unwrap_or_else(|_| "slack.com".to_string());
        let slack_token = std::env::var("DEPLOY_SLACK_TOKEN").unwrap_or_default();
        let slack_channel = std::env::var("DEPLOY_SLACK_CHANNEL")
            .unwrap_or_else(|_| "#deployments".to_string());
        let webhook_timeout_secs = std::env::var("DEPLOY_WEBHOOK_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        if agent_secret.is_empty() {
            tracing::warn!("DEPLOY_AGENT_SECRET not set -- agent request signing disabled");
        }
        if slack_token.is_empty() {
            tracing::warn!("DEPLOY_SLACK_TOKEN not set -- chat notifications disabled");
        }

        Self {
            base_url,
            build_command,
            workspace_dir,
            package_dir,
            package_url,
            poll_interval_secs,
            build_cooldown_secs,
            tick_interval_secs,
            agent_auth,
            agent_secret,
            agent_port,
            slack_host,
            slack_token,
            slack_channel,
            webhook_timeout_secs,
        }
    }
}
