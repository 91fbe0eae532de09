//! Build runner — background task that polls for queued builds and runs
//! them.
//!
//! Spawns one external builder process per build, streams its combined
//! output into the build's log row as it arrives, and classifies the
//! outcome. A zero exit code alone is not success: the expected `.deb`
//! or `.rpm` artifact must exist.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use diesel_async::AsyncPgConnection;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::DeployConfig;
use crate::db::DbPool;
use crate::models::build::BuildState;
use crate::models::project::Project;
use crate::notify::Notifier;
use crate::services::{build_service, flow_service, project_service, release_service};

/// Per-project build cooldown. In-memory and best-effort: it guards one
/// process against duplicate concurrent builds, nothing more, and resets
/// on restart.
pub struct BuildGuard {
    last_started: Mutex<HashMap<i64, Instant>>,
}

impl BuildGuard {
    pub fn new() -> Self {
        Self {
            last_started: Mutex::new(HashMap::new()),
        }
    }

    /// Record a build start for the project unless one started within the
    /// cooldown window. Returns whether the caller may proceed.
    pub fn try_start(&self, project_id: i64, cooldown: Duration) -> bool {
        let mut map = self
            .last_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(started) = map.get(&project_id) {
            if started.elapsed() < cooldown {
                return false;
            }
        }
        map.insert(project_id, Instant::now());
        true
    }
}

impl Default for BuildGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the builder loop forever. Spawned as a background tokio task.
pub async fn run_builder(pool: DbPool, config: DeployConfig, notifier: Arc<Notifier>) {
    let guard = BuildGuard::new();

    tracing::info!(
        workspace = %config.workspace_dir,
        command = %config.build_command,
        "Build runner started"
    );

    loop {
        if let Err(e) = poll_and_build(&pool, &config, &notifier, &guard).await {
            tracing::error!("Builder poll error: {e}");
        }
        tokio::time::sleep(Duration::from_secs(config.poll_interval_secs)).await;
    }
}

/// Pick the oldest queued build whose project is clear of the cooldown
/// window and run it.
async fn poll_and_build(
    pool: &DbPool,
    config: &DeployConfig,
    notifier: &Notifier,
    guard: &BuildGuard,
) -> anyhow::Result<()> {
    let queued = {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        build_service::list_queued(&mut conn).await?
    };

    for build in queued {
        if start_build(pool, config, notifier, guard, build.id).await? {
            return Ok(());
        }
    }

    Ok(())
}

/// Run one build end to end. Returns whether a builder process actually
/// ran; a cooldown hit or an already-terminal build is a silent no-op.
pub async fn start_build(
    pool: &DbPool,
    config: &DeployConfig,
    notifier: &Notifier,
    guard: &BuildGuard,
    build_id: i64,
) -> anyhow::Result<bool> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;

    let build = build_service::get_build(&mut conn, build_id).await?;
    if build.state != BuildState::Queued.as_i32() {
        return Ok(false);
    }

    let project = project_service::get_project(&mut conn, build.project_id).await?;

    if !guard.try_start(project.id, Duration::from_secs(config.build_cooldown_secs)) {
        tracing::debug!(build_id, project_id = project.id, "Build cooldown, skipping");
        return Ok(false);
    }

    if !valid_repo_url(&project.repo_url) {
        let log = format!("Invalid repository URL: {}\n", project.repo_url);
        finish_failed(&mut conn, config, notifier, build_id, project.id, &log).await?;
        return Ok(true);
    }

    let repo = project.repo_name();
    let existing = build_service::find_build_number(&mut conn, &repo).await?;
    let build_num = existing.unwrap_or(0) + 1;
    build_service::set_build_number(&mut conn, &repo, build_num, existing.is_none()).await?;

    tracing::info!(
        build_id,
        repo = %repo,
        branch = %project.branch,
        build_num,
        "Executing build"
    );
    notifier
        .notify_project(
            &mut conn,
            project.id,
            &format!(
                "{} started for branch {}",
                build_link(&config.base_url, build_id),
                project.branch
            ),
        )
        .await;

    let build_start = Instant::now();
    let args = build_args(&project, build_num);

    let mut child = match Command::new(&config.build_command)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let log = format!("Failed to spawn builder: {e}\n");
            finish_failed(&mut conn, config, notifier, build_id, project.id, &log).await?;
            return Ok(true);
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("builder stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("builder stderr not captured"))?;

    // Stream combined output so an in-progress build can be tailed.
    let mut log = String::new();
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        let line = tokio::select! {
            line = out_lines.next_line(), if out_open => match line {
                Ok(Some(line)) => Some(line),
                Ok(None) => {
                    out_open = false;
                    None
                }
                Err(e) => {
                    out_open = false;
                    Some(format!("log read error: {e}"))
                }
            },
            line = err_lines.next_line(), if err_open => match line {
                Ok(Some(line)) => Some(line),
                Ok(None) => {
                    err_open = false;
                    None
                }
                Err(e) => {
                    err_open = false;
                    Some(format!("log read error: {e}"))
                }
            },
        };

        if let Some(line) = line {
            log.push_str(&line);
            log.push('\n');
            build_service::update_log(&mut conn, build_id, &log).await?;
        }
    }

    let status = child.wait().await?;
    crate::metrics::build_duration(build_start.elapsed().as_millis() as u64);

    if !status.success() {
        tracing::warn!(build_id, code = ?status.code(), "Build process failed");
        finish_failed(&mut conn, config, notifier, build_id, project.id, &log).await?;
        return Ok(true);
    }

    // A clean exit still needs an artifact to count as success.
    let package_dir = Path::new(&config.workspace_dir).join(&repo).join("package");
    let artifact = match find_artifact(&package_dir) {
        Some(artifact) => artifact,
        None => {
            log.push_str("No package artifact produced\n");
            finish_failed(&mut conn, config, notifier, build_id, project.id, &log).await?;
            return Ok(true);
        }
    };

    let src = package_dir.join(&artifact);
    let dest = Path::new(&config.package_dir).join(&artifact);
    if let Err(e) = move_artifact(&src, &dest).await {
        log.push_str(&format!("Failed to archive {artifact}: {e}\n"));
        finish_failed(&mut conn, config, notifier, build_id, project.id, &log).await?;
        return Ok(true);
    }

    build_service::update_log(&mut conn, build_id, &log).await?;
    build_service::set_build_file(&mut conn, build_id, &artifact).await?;
    build_service::set_state(&mut conn, build_id, BuildState::Success).await?;

    tracing::info!(build_id, artifact = %artifact, "Build finished");
    notifier
        .notify_project(
            &mut conn,
            project.id,
            &format!("{} successful", build_link(&config.base_url, build_id)),
        )
        .await;

    // Auto-release the fresh build through every flow that asks for it.
    for flow in flow_service::get_auto_flows(&mut conn, project.id).await? {
        if let Err(e) =
            release_service::create_release(&mut conn, config, notifier, build_id, flow.id, None)
                .await
        {
            tracing::error!(build_id, flow_id = flow.id, "Auto-release failed: {e}");
        }
    }

    Ok(true)
}

/// Terminal failure path: persist the log, mark Failed, notify.
async fn finish_failed(
    conn: &mut AsyncPgConnection,
    config: &DeployConfig,
    notifier: &Notifier,
    build_id: i64,
    project_id: i64,
    log: &str,
) -> anyhow::Result<()> {
    build_service::update_log(conn, build_id, log).await?;
    build_service::set_state(conn, build_id, BuildState::Failed).await?;
    notifier
        .notify_project(
            conn,
            project_id,
            &format!("{} failed", build_link(&config.base_url, build_id)),
        )
        .await;
    Ok(())
}

/// Slack-style link to a build's log view.
fn build_link(base_url: &str, build_id: i64) -> String {
    format!(
        "<{}/projects/build/view/{}|#{}>",
        base_url.trim_end_matches('/'),
        build_id,
        build_id
    )
}

/// Minimal sanity check before handing a URL to the builder.
fn valid_repo_url(url: &str) -> bool {
    url.contains("://") || url.starts_with("git@")
}

/// Builder command line for a project at a given build number.
fn build_args(project: &Project, build_num: i64) -> Vec<String> {
    let mut args = vec![
        "--branch".to_string(),
        project.branch.clone(),
        "--build".to_string(),
        build_num.to_string(),
        "--id".to_string(),
        project.idhash.clone(),
    ];

    if !project.deploy_file.is_empty() {
        args.push("--deploy-file".to_string());
        args.push(project.deploy_file.clone());
    }
    if !project.package_name.is_empty() {
        args.push("--name".to_string());
        args.push(project.package_name.clone());
    }
    if !project.build_script.is_empty() {
        args.push("--build-script".to_string());
        args.push(project.build_script.clone());
    }
    if !project.postinstall_script.is_empty() {
        args.push("--postinst-script".to_string());
        args.push(project.postinstall_script.clone());
    }
    if !project.package_manager.is_empty() {
        args.push("--packman".to_string());
        args.push(project.package_manager.clone());
    }
    if !project.deploy_type.is_empty() {
        args.push("--dtype".to_string());
        args.push(project.deploy_type.clone());
    }

    args.push(project.repo_url.clone());
    args
}

/// First installable package in the builder's output directory, by name.
fn find_artifact(dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(".deb") || name.ends_with(".rpm"))
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Move an artifact into the shared archive, copying when a rename
/// crosses filesystems.
async fn move_artifact(src: &Path, dest: &Path) -> anyhow::Result<()> {
    if tokio::fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(src, dest).await?;
    tokio::fs::remove_file(src).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn project() -> Project {
        Project {
            id: 1,
            name: "Test project".into(),
            repo_url: "https://github.com/centrixsystems/pkgtools.git".into(),
            branch: "develop".into(),
            deploy_file: ".deploy.yaml".into(),
            idhash: "6d8adfebec3011e59599b88d121fe884".into(),
            notifications: false,
            slack_channel: "#mychan".into(),
            release_stream_id: Some(1),
            build_script: "scripts/test_build.sh".into(),
            package_name: "test_package".into(),
            postinstall_script: "scripts/test_post.sh".into(),
            package_manager: "deb".into(),
            deploy_type: "virtualenv".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn build_args_full_project() {
        let args = build_args(&project(), 7);
        assert_eq!(
            args,
            vec![
                "--branch",
                "develop",
                "--build",
                "7",
                "--id",
                "6d8adfebec3011e59599b88d121fe884",
                "--deploy-file",
                ".deploy.yaml",
                "--name",
                "test_package",
                "--build-script",
                "scripts/test_build.sh",
                "--postinst-script",
                "scripts/test_post.sh",
                "--packman",
                "deb",
                "--dtype",
                "virtualenv",
                "https://github.com/centrixsystems/pkgtools.git",
            ]
        );
    }

    #[test]
    fn build_args_skips_empty_overrides() {
        let mut p = project();
        p.deploy_file.clear();
        p.package_name.clear();
        p.build_script.clear();
        p.postinstall_script.clear();
        p.package_manager.clear();
        p.deploy_type.clear();

        let args = build_args(&p, 1);
        assert_eq!(
            args,
            vec![
                "--branch",
                "develop",
                "--build",
                "1",
                "--id",
                "6d8adfebec3011e59599b88d121fe884",
                "https://github.com/centrixsystems/pkgtools.git",
            ]
        );
    }

    #[test]
    fn repo_url_validation() {
        assert!(valid_repo_url("https://github.com/org/repo.git"));
        assert!(valid_repo_url("git@github.com:org/repo.git"));
        assert!(!valid_repo_url("This is not a valid URL."));
        assert!(!valid_repo_url(""));
    }

    #[test]
    fn build_link_format() {
        assert_eq!(
            build_link("http://localhost:8080", 1),
            "<http://localhost:8080/projects/build/view/1|#1>"
        );
        assert_eq!(
            build_link("http://deploy.example.com/", 42),
            "<http://deploy.example.com/projects/build/view/42|#42>"
        );
    }

    #[test]
    fn find_artifact_picks_first_package() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("b-package_0.2_amd64.deb"), b"x").unwrap();
        std::fs::write(dir.path().join("a-package_0.1_amd64.deb"), b"x").unwrap();

        assert_eq!(
            find_artifact(dir.path()),
            Some("a-package_0.1_amd64.deb".to_string())
        );
    }

    #[test]
    fn find_artifact_accepts_rpm() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pkg-1.0.x86_64.rpm"), b"x").unwrap();

        assert_eq!(find_artifact(dir.path()), Some("pkg-1.0.x86_64.rpm".to_string()));
    }

    #[test]
    fn find_artifact_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("build.log"), b"x").unwrap();

        assert_eq!(find_artifact(dir.path()), None);
    }

    #[test]
    fn find_artifact_missing_dir() {
        assert_eq!(find_artifact(Path::new("/nonexistent/package")), None);
    }

    #[test]
    fn guard_blocks_within_cooldown() {
        let guard = BuildGuard::new();
        assert!(guard.try_start(1, Duration::from_secs(1800)));
        assert!(!guard.try_start(1, Duration::from_secs(1800)));
        // Other projects are unaffected.
        assert!(guard.try_start(2, Duration::from_secs(1800)));
    }

    #[test]
    fn guard_allows_after_cooldown() {
        let guard = BuildGuard::new();
        assert!(guard.try_start(1, Duration::from_secs(0)));
        assert!(guard.try_start(1, Duration::from_secs(0)));
    }
}
