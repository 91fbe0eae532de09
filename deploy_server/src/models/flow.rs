//! deploy.flow — A named deployment policy binding a project to a
//! stream and/or target servers with gating rules.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_flows;

/// Where a locked release gets dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    StreamOnly = 0,
    TargetOnly = 1,
    StreamAndTarget = 2,
}

impl StreamMode {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::StreamOnly),
            1 => Some(Self::TargetOnly),
            2 => Some(Self::StreamAndTarget),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_flows)]
pub struct ReleaseFlow {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
    pub stream_id: Option<i64>,
    pub stream_mode: i32,
    pub require_signoff: bool,
    pub signoff_list: String,
    pub quorum: i32,
    pub notify_list: String,
    pub service_restart: bool,
    pub service_pre_stop: bool,
    pub puppet_run: bool,
    pub auto_release: bool,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = deploy_flows)]
pub struct NewReleaseFlow {
    pub name: String,
    pub project_id: i64,
    pub stream_id: Option<i64>,
    pub stream_mode: i32,
    pub require_signoff: bool,
    pub signoff_list: String,
    pub quorum: i32,
    pub notify_list: String,
    pub service_restart: bool,
    pub service_pre_stop: bool,
    pub puppet_run: bool,
    pub auto_release: bool,
}

impl ReleaseFlow {
    pub fn mode(&self) -> StreamMode {
        // Unknown values fall back to stream-only, the least invasive mode.
        StreamMode::from_i32(self.stream_mode).unwrap_or(StreamMode::StreamOnly)
    }

    /// Configured signer identifiers, parsed from the stored text list.
    pub fn signoff_list(&self) -> Vec<String> {
        parse_list(&self.signoff_list)
    }

    /// Schedule-notification recipients, parsed from the stored text list.
    pub fn notify_list(&self) -> Vec<String> {
        parse_list(&self.notify_list)
    }
}

/// Split a stored recipient list on newlines, commas, and whitespace.
fn parse_list(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_empty() {
        assert!(parse_list("").is_empty());
        assert!(parse_list("  \n ").is_empty());
    }

    #[test]
    fn parse_list_mixed_separators() {
        assert_eq!(
            parse_list("a@example.com, b@example.com\nc@example.com"),
            vec!["a@example.com", "b@example.com", "c@example.com"]
        );
    }

    #[test]
    fn mode_unknown_falls_back() {
        assert_eq!(StreamMode::from_i32(7), None);
    }
}
