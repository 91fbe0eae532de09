//! deploy.build — One build attempt for a project.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_builds;

/// Build lifecycle states, stored as small integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Queued = 0,
    Success = 1,
    Failed = 2,
    Canceled = 3,
}

impl BuildState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Queued),
            1 => Some(Self::Success),
            2 => Some(Self::Failed),
            3 => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_builds)]
pub struct Build {
    pub id: i64,
    pub project_id: i64,
    pub build_time: DateTime<Utc>,
    pub state: i32,
    pub log: String,
    pub build_file: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deploy_builds)]
pub struct NewBuild {
    pub project_id: i64,
    pub build_time: DateTime<Utc>,
    pub state: i32,
    pub log: String,
    pub build_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        for state in [
            BuildState::Queued,
            BuildState::Success,
            BuildState::Failed,
            BuildState::Canceled,
        ] {
            assert_eq!(BuildState::from_i32(state.as_i32()), Some(state));
        }
    }

    #[test]
    fn state_unknown_value() {
        assert_eq!(BuildState::from_i32(42), None);
    }
}
