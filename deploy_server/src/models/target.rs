//! deploy.target — A (flow, server) deployment binding with rollout state.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::deploy_targets;

/// Per-server rollout states, stored as small integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle = 0,
    InProgress = 1,
    Success = 2,
    Failed = 3,
}

impl DeployState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::InProgress),
            2 => Some(Self::Success),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = deploy_targets)]
pub struct Target {
    pub id: i64,
    pub flow_id: i64,
    pub server_id: i64,
    pub deploy_state: i32,
    pub log: String,
    /// Last build successfully deployed to this target.
    pub current_build_id: Option<i64>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deploy_targets)]
pub struct NewTarget {
    pub flow_id: i64,
    pub server_id: i64,
    pub deploy_state: i32,
    pub log: String,
    pub current_build_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        for state in [
            DeployState::Idle,
            DeployState::InProgress,
            DeployState::Success,
            DeployState::Failed,
        ] {
            assert_eq!(DeployState::from_i32(state.as_i32()), Some(state));
        }
    }
}
