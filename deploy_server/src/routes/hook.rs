//! Inbound hooks — repo push notifications and agent checkins.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;

use crate::agent::compute_signature;
use crate::config::DeployConfig;
use crate::routes::DeployRouterState;
use crate::services::{build_service, project_service, server_service};

/// Handle a repository push hook addressed by project identity token.
///
/// A payload naming a different branch is acknowledged but ignored; a
/// project with a build already queued is not queued again.
pub async fn handle_build_hook(
    state: &DeployRouterState,
    idhash: &str,
    body: Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let project = project_service::find_by_idhash(&mut conn, idhash)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) {
        if let Some(git_ref) = payload.get("ref").and_then(|r| r.as_str()) {
            if branch_of_ref(git_ref) != project.branch {
                tracing::debug!(
                    project = %project.name,
                    git_ref,
                    "Push for other branch ignored"
                );
                return Ok(Json(serde_json::json!({"result": "Request ignored"})));
            }
        }
    }

    if build_service::find_queued_build(&mut conn, project.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Ok(Json(serde_json::json!({"result": "Already building"})));
    }

    let build = build_service::create_build(&mut conn, project.id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create build: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::info!(
        build_id = build.id,
        project = %project.name,
        "Build created from push hook"
    );

    Ok(Json(serde_json::json!({"result": "Building"})))
}

/// Handle a signed agent checkin: upsert the server row and stamp its
/// checkin time.
pub async fn handle_checkin(
    state: &DeployRouterState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !verify_checkin(&state.config, headers, &body) {
        tracing::warn!("Checkin signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let hostname = payload
        .get("hostname")
        .and_then(|h| h.as_str())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let mut conn = state
        .pool
        .get()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let server = server_service::record_checkin(&mut conn, hostname)
        .await
        .map_err(|e| {
            tracing::error!(hostname, "Checkin failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::debug!(server_id = server.id, hostname, "Agent checkin");

    Ok(Json(serde_json::json!({})))
}

/// Validate an inbound checkin's `authorization` and `sig` headers
/// against the shared agent credentials.
pub fn verify_checkin(config: &DeployConfig, headers: &HeaderMap, body: &[u8]) -> bool {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let sig = headers
        .get("sig")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if auth != config.agent_auth {
        return false;
    }

    if config.agent_secret.is_empty() {
        tracing::warn!("Agent secret not configured, skipping checkin validation");
        return true;
    }

    let expected = compute_signature(
        &config.agent_auth,
        &config.agent_secret,
        "POST",
        "/api/checkin",
        Some(body),
    );

    expected == sig
}

/// Branch name from a git ref like `refs/heads/develop`. Branch names
/// may themselves contain slashes.
fn branch_of_ref(git_ref: &str) -> &str {
    git_ref.splitn(3, '/').nth(2).unwrap_or(git_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(auth: &str, secret: &str) -> DeployConfig {
        let mut config = DeployConfig::from_env();
        config.agent_auth = auth.to_string();
        config.agent_secret = secret.to_string();
        config
    }

    fn signed_headers(auth: &str, sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", auth.parse().unwrap());
        headers.insert("sig", sig.parse().unwrap());
        headers
    }

    #[test]
    fn ref_parsing() {
        assert_eq!(branch_of_ref("refs/heads/develop"), "develop");
        assert_eq!(branch_of_ref("refs/heads/feature/thing"), "feature/thing");
        assert_eq!(branch_of_ref("develop"), "develop");
    }

    #[test]
    fn checkin_accepts_valid_signature() {
        let config = config("token", "secret");
        let body = br#"{"hostname": "web-1"}"#;
        let sig = compute_signature("token", "secret", "POST", "/api/checkin", Some(body));

        assert!(verify_checkin(&config, &signed_headers("token", &sig), body));
    }

    #[test]
    fn checkin_rejects_wrong_token() {
        let config = config("token", "secret");
        let body = br#"{"hostname": "web-1"}"#;
        let sig = compute_signature("other", "secret", "POST", "/api/checkin", Some(body));

        assert!(!verify_checkin(&config, &signed_headers("other", &sig), body));
    }

    #[test]
    fn checkin_rejects_tampered_body() {
        let config = config("token", "secret");
        let sig = compute_signature(
            "token",
            "secret",
            "POST",
            "/api/checkin",
            Some(br#"{"hostname": "web-1"}"#),
        );

        assert!(!verify_checkin(
            &config,
            &signed_headers("token", &sig),
            br#"{"hostname": "web-2"}"#
        ));
    }

    #[test]
    fn checkin_rejects_bad_signature() {
        let config = config("token", "secret");
        let body = br#"{"hostname": "web-1"}"#;

        assert!(!verify_checkin(
            &config,
            &signed_headers("token", "bogus"),
            body
        ));
    }
}
