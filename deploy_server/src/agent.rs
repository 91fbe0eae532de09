//! Deployment-agent client — signed HTTPS calls to remote hosts.
//!
//! Every request carries an `authorization` header (shared token) and a
//! `sig` header: base64 HMAC-SHA1 over `token\nMETHOD\n/path` plus, for
//! bodies, the SHA1 hex digest of the body as a fourth line. One method
//! per known agent operation; no dynamic path construction.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Compute the request signature for the agent protocol.
///
/// Shared by the outbound client and the inbound checkin verifier.
pub fn compute_signature(
    auth: &str,
    key: &str,
    method: &str,
    path: &str,
    body: Option<&[u8]>,
) -> String {
    let mut lines = vec![auth.to_string(), method.to_string(), path.to_string()];
    if let Some(body) = body {
        lines.push(hex::encode(Sha1::digest(body)));
    }

    let mut mac =
        HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(lines.join("\n").as_bytes());

    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// JSON response body returned by agent operations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentResponse {
    /// An explicit error, a non-zero code, or stderr with no stdout all
    /// count as failure.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
            || self.code.unwrap_or(0) != 0
            || (!self.stderr.is_empty() && self.stdout.is_empty())
    }

    /// Combined output for target logs.
    pub fn combined_output(&self) -> String {
        let mut out = String::new();
        if let Some(err) = &self.error {
            out.push_str(err);
            out.push('\n');
        }
        out.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

pub struct AgentClient {
    host: String,
    port: u16,
    auth: String,
    key: String,
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new(host: &str, port: u16, auth: &str, key: &str) -> anyhow::Result<Self> {
        // Agents present self-signed certificates.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            host: host.to_string(),
            port,
            auth: auth.to_string(),
            key: key.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}:{}/{}", self.host, self.port, path)
    }

    async fn get(&self, path: &str) -> anyhow::Result<AgentResponse> {
        let sig = compute_signature(&self.auth, &self.key, "GET", &format!("/{path}"), None);

        let resp = self
            .client
            .get(self.url(path))
            .header("authorization", &self.auth)
            .header("sig", sig)
            .header("Content-Type", "application/json")
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str, data: serde_json::Value) -> anyhow::Result<AgentResponse> {
        let body = serde_json::to_vec(&data)?;
        let sig = compute_signature(
            &self.auth,
            &self.key,
            "POST",
            &format!("/{path}"),
            Some(&body),
        );

        let resp = self
            .client
            .post(self.url(path))
            .header("authorization", &self.auth)
            .header("sig", sig)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json().await?)
    }

    /// Query host facts and service state.
    pub async fn get_info(&self) -> anyhow::Result<AgentResponse> {
        self.get("info").await
    }

    /// Stop all managed services.
    pub async fn stop_all(&self) -> anyhow::Result<AgentResponse> {
        self.post("server/stop", serde_json::json!({})).await
    }

    /// Start all managed services.
    pub async fn start_all(&self) -> anyhow::Result<AgentResponse> {
        self.post("server/start", serde_json::json!({})).await
    }

    /// Restart all managed services.
    pub async fn restart_all(&self) -> anyhow::Result<AgentResponse> {
        self.post("server/restart", serde_json::json!({})).await
    }

    /// Install a package from the archive.
    pub async fn install_package(&self, name: &str, url: &str) -> anyhow::Result<AgentResponse> {
        self.post(
            "server/install",
            serde_json::json!({ "name": name, "url": url }),
        )
        .await
    }

    /// Trigger a configuration-management run.
    pub async fn puppet_run(&self) -> anyhow::Result<AgentResponse> {
        self.post("server/puppet", serde_json::json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let a = compute_signature("token", "secret", "GET", "/info", None);
        let b = compute_signature("token", "secret", "GET", "/info", None);
        assert_eq!(a, b);
        // base64 of a 20-byte SHA1 digest
        assert_eq!(a.len(), 28);
    }

    #[test]
    fn signature_covers_method_and_path() {
        let get = compute_signature("token", "secret", "GET", "/info", None);
        let post = compute_signature("token", "secret", "POST", "/info", None);
        let other = compute_signature("token", "secret", "GET", "/status", None);
        assert_ne!(get, post);
        assert_ne!(get, other);
    }

    #[test]
    fn signature_covers_body() {
        let empty = compute_signature("token", "secret", "POST", "/server/install", None);
        let a = compute_signature("token", "secret", "POST", "/server/install", Some(b"{}"));
        let b = compute_signature(
            "token",
            "secret",
            "POST",
            "/server/install",
            Some(b"{\"name\":\"x\"}"),
        );
        assert_ne!(empty, a);
        assert_ne!(a, b);
    }

    #[test]
    fn failure_classification() {
        let ok = AgentResponse {
            stdout: "done".into(),
            ..Default::default()
        };
        assert!(!ok.is_failure());

        let explicit = AgentResponse {
            error: Some("boom".into()),
            ..Default::default()
        };
        assert!(explicit.is_failure());

        let bad_code = AgentResponse {
            stdout: "partial".into(),
            code: Some(1),
            ..Default::default()
        };
        assert!(bad_code.is_failure());

        let stderr_only = AgentResponse {
            stderr: "unit not found".into(),
            ..Default::default()
        };
        assert!(stderr_only.is_failure());

        // stderr alongside stdout is noise, not failure
        let noisy = AgentResponse {
            stdout: "installed".into(),
            stderr: "warning: cache stale".into(),
            ..Default::default()
        };
        assert!(!noisy.is_failure());
    }
}
