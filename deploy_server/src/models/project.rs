//! deploy.project — A registered source repository with build settings.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_projects;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_projects)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repo_url: String,
    pub branch: String,
    pub deploy_file: String,
    pub idhash: String,
    pub notifications: bool,
    pub slack_channel: String,
    pub release_stream_id: Option<i64>,
    pub build_script: String,
    pub package_name: String,
    pub postinstall_script: String,
    pub package_manager: String,
    pub deploy_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = deploy_projects)]
pub struct NewProject {
    pub name: String,
    pub repo_url: String,
    pub branch: String,
    pub deploy_file: String,
    pub idhash: String,
    pub notifications: bool,
    pub slack_channel: String,
    pub release_stream_id: Option<i64>,
    pub build_script: String,
    pub package_name: String,
    pub postinstall_script: String,
    pub package_manager: String,
    pub deploy_type: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Repository name: the final path segment of the repo URL with a
    /// trailing `.git` stripped. Keys the build-number counter.
    pub fn repo_name(&self) -> String {
        let last = self
            .repo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.repo_url);
        last.trim_end_matches(".git").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(repo_url: &str) -> Project {
        Project {
            id: 1,
            name: "Test project".into(),
            repo_url: repo_url.into(),
            branch: "develop".into(),
            deploy_file: ".deploy.yaml".into(),
            idhash: "6d8adfebec3011e59599b88d121fe884".into(),
            notifications: false,
            slack_channel: "#mychan".into(),
            release_stream_id: None,
            build_script: String::new(),
            package_name: String::new(),
            postinstall_script: String::new(),
            package_manager: "deb".into(),
            deploy_type: "virtualenv".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn repo_name_strips_git_suffix() {
        let p = project("https://github.com/centrixsystems/pkgtools.git");
        assert_eq!(p.repo_name(), "pkgtools");
    }

    #[test]
    fn repo_name_without_suffix() {
        let p = project("https://example.com/repos/myproj");
        assert_eq!(p.repo_name(), "myproj");
    }

    #[test]
    fn repo_name_trailing_slash() {
        let p = project("https://example.com/repos/myproj.git/");
        assert_eq!(p.repo_name(), "myproj");
    }
}
